//! 설정 모듈 - 환경변수 기반 애플리케이션 설정
//!
//! 모든 값은 환경변수에서 읽으며, 없으면 기본값을 사용합니다.
//! 저장 위치 기본값: ~/.docchat-rag/

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use url::Url;

// ============================================================================
// Defaults
// ============================================================================

/// Ollama 기본 주소
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// 기본 임베딩 모델 (nomic-embed-text: 768차원)
pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";

/// 기본 임베딩 차원
pub const DEFAULT_EMBED_DIMENSION: usize = 768;

/// 기본 채팅 모델
pub const DEFAULT_CHAT_MODEL: &str = "llama3.2";

/// 기본 문서 인덱스 이름
pub const DEFAULT_INDEX_NAME: &str = "org_pedia";

/// 기본 서버 바인드 주소
pub const DEFAULT_BIND: &str = "127.0.0.1:5000";

/// 검색 임계값 (정밀도 우선 → 재현율 폴백)
pub const DEFAULT_MIN_SCORES: [f32; 3] = [0.7, 0.5, 0.3];

/// 임계값당 최대 검색 결과 수
pub const DEFAULT_MAX_RESULTS: usize = 5;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.docchat-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".docchat-rag")
}

// ============================================================================
// AppConfig
// ============================================================================

/// 검색 정책 설정
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalConfig {
    /// 내림차순 최소 점수 목록 (앞에서부터 시도)
    pub min_scores: Vec<f32>,
    /// 시도당 최대 결과 수
    pub max_results: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            min_scores: DEFAULT_MIN_SCORES.to_vec(),
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

/// 애플리케이션 설정
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub ollama_host: Url,
    pub embed_model: String,
    pub embed_dimension: usize,
    pub chat_model: String,
    pub index_name: String,
    pub bind: String,
    pub retrieval: RetrievalConfig,
}

impl AppConfig {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 키 조회 함수로부터 설정 생성 (빈 문자열은 미설정으로 취급)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_dir = get("DOCCHAT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(get_data_dir);

        let host = get("OLLAMA_HOST").unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string());
        let ollama_host = parse_base_url(&host)
            .with_context(|| format!("Invalid OLLAMA_HOST: {}", host))?;

        let embed_dimension = match get("DOCCHAT_EMBED_DIMENSION") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .with_context(|| format!("Invalid DOCCHAT_EMBED_DIMENSION: {}", v))?,
            None => DEFAULT_EMBED_DIMENSION,
        };

        let min_scores = match get("DOCCHAT_MIN_SCORES") {
            Some(v) => parse_min_scores(&v)?,
            None => DEFAULT_MIN_SCORES.to_vec(),
        };

        let max_results = match get("DOCCHAT_MAX_RESULTS") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .with_context(|| format!("Invalid DOCCHAT_MAX_RESULTS: {}", v))?,
            None => DEFAULT_MAX_RESULTS,
        };

        let config = Self {
            data_dir,
            ollama_host,
            embed_model: get("DOCCHAT_EMBED_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBED_MODEL.to_string()),
            embed_dimension,
            chat_model: get("DOCCHAT_CHAT_MODEL")
                .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            index_name: get("DOCCHAT_INDEX").unwrap_or_else(|| DEFAULT_INDEX_NAME.to_string()),
            bind: get("DOCCHAT_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            retrieval: RetrievalConfig {
                min_scores,
                max_results,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// 설정 값 검증
    pub fn validate(&self) -> Result<()> {
        if self.embed_dimension == 0 {
            bail!("DOCCHAT_EMBED_DIMENSION must be > 0");
        }

        if self.retrieval.max_results == 0 {
            bail!("DOCCHAT_MAX_RESULTS must be >= 1");
        }

        if self.retrieval.min_scores.is_empty() {
            bail!("DOCCHAT_MIN_SCORES must contain at least one threshold");
        }

        if let Some(bad) = self
            .retrieval
            .min_scores
            .iter()
            .find(|s| !(0.0..=1.0).contains(*s))
        {
            bail!("DOCCHAT_MIN_SCORES values must be in [0.0, 1.0], got {}", bad);
        }

        if self.retrieval.min_scores.windows(2).any(|w| w[0] <= w[1]) {
            bail!("DOCCHAT_MIN_SCORES must be strictly descending");
        }

        if self.index_name.contains(['/', '\\']) {
            bail!("DOCCHAT_INDEX must not contain path separators");
        }

        Ok(())
    }

    /// 대화 기록 DB 경로
    pub fn history_db_path(&self) -> PathBuf {
        self.data_dir.join("history.db")
    }

    /// LanceDB 디렉토리 경로
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join("index.lance")
    }
}

/// 베이스 URL 파싱
///
/// 경로가 `/`로 끝나야 `join("api/...")`가 접두 경로(예: 리버스 프록시의 `/ollama`)를 유지합니다.
fn parse_base_url(value: &str) -> Result<Url> {
    let mut url = Url::parse(value.trim())?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// "0.7,0.5,0.3" 형식 파싱
fn parse_min_scores(value: &str) -> Result<Vec<f32>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f32>()
                .with_context(|| format!("Invalid threshold in DOCCHAT_MIN_SCORES: {}", s))
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.chat_model, "llama3.2");
        assert_eq!(config.index_name, "org_pedia");
        assert_eq!(config.embed_dimension, 768);
        assert_eq!(config.retrieval.min_scores, vec![0.7, 0.5, 0.3]);
        assert_eq!(config.retrieval.max_results, 5);
        assert_eq!(config.ollama_host.as_str(), "http://localhost:11434/");
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("DOCCHAT_DATA_DIR", "/tmp/docchat"),
            ("DOCCHAT_INDEX", "handbook"),
            ("DOCCHAT_MIN_SCORES", "0.8, 0.4"),
            ("DOCCHAT_MAX_RESULTS", "3"),
        ])
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/docchat"));
        assert_eq!(config.history_db_path(), PathBuf::from("/tmp/docchat/history.db"));
        assert_eq!(config.index_name, "handbook");
        assert_eq!(config.retrieval.min_scores, vec![0.8, 0.4]);
        assert_eq!(config.retrieval.max_results, 3);
    }

    #[test]
    fn test_empty_value_falls_back_to_default() {
        let config = config_from(&[("DOCCHAT_CHAT_MODEL", "  ")]).unwrap();
        assert_eq!(config.chat_model, DEFAULT_CHAT_MODEL);
    }

    #[test]
    fn test_rejects_ascending_thresholds() {
        let err = config_from(&[("DOCCHAT_MIN_SCORES", "0.3,0.5")]).unwrap_err();
        assert!(err.to_string().contains("strictly descending"));
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let err = config_from(&[("DOCCHAT_MIN_SCORES", "1.5,0.5")]).unwrap_err();
        assert!(err.to_string().contains("[0.0, 1.0]"));
    }

    #[test]
    fn test_host_path_prefix_is_kept() {
        let config = config_from(&[("OLLAMA_HOST", "http://gateway:8080/ollama")]).unwrap();
        assert_eq!(config.ollama_host.as_str(), "http://gateway:8080/ollama/");

        let chat = crate::llm::OllamaChat::new(&config.ollama_host).unwrap();
        assert_eq!(chat.endpoint().as_str(), "http://gateway:8080/ollama/api/chat");

        let embedder =
            crate::embedding::OllamaEmbedding::new(&config.ollama_host, "nomic-embed-text", 768)
                .unwrap();
        assert_eq!(embedder.endpoint().as_str(), "http://gateway:8080/ollama/api/embed");

        // 이미 슬래시로 끝나면 그대로
        let config = config_from(&[("OLLAMA_HOST", "http://gateway:8080/ollama/")]).unwrap();
        assert_eq!(config.ollama_host.as_str(), "http://gateway:8080/ollama/");
    }

    #[test]
    fn test_rejects_bad_host_and_zero_results() {
        assert!(config_from(&[("OLLAMA_HOST", "not a url")]).is_err());
        assert!(config_from(&[("DOCCHAT_MAX_RESULTS", "0")]).is_err());
        assert!(config_from(&[("DOCCHAT_EMBED_DIMENSION", "abc")]).is_err());
    }
}
