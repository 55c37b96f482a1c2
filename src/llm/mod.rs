//! LLM 모듈 - 스트리밍 채팅 모델 클라이언트
//!
//! 역할이 지정된 메시지 목록을 받아 텍스트 조각 스트림을 반환합니다.
//! 마지막 조각은 `done = true` 입니다.
//! ref: https://github.com/ollama/ollama/blob/main/docs/api.md#generate-a-chat-completion

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::history::Role;

// ============================================================================
// Types
// ============================================================================

/// 모델에 전달되는 메시지
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// 스트리밍 응답 조각
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatChunk {
    /// 텍스트 조각 (빈 문자열 가능)
    pub content: String,
    /// 종료 표시
    pub done: bool,
}

/// 채팅 조각 스트림
pub type ChatStream = BoxStream<'static, Result<ChatChunk>>;

// ============================================================================
// ChatModel Trait
// ============================================================================

/// 채팅 모델 트레이트
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// 스트리밍 채팅 요청
    ///
    /// 요청 자체가 실패하면 Err, 스트림 도중 실패는 스트림 항목의 Err 입니다.
    async fn stream_chat(&self, model: &str, messages: &[PromptMessage]) -> Result<ChatStream>;
}

// ============================================================================
// Ollama Chat
// ============================================================================

/// Ollama 채팅 클라이언트
#[derive(Debug, Clone)]
pub struct OllamaChat {
    endpoint: Url,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    stream: bool,
}

/// NDJSON 한 줄
#[derive(Debug, Deserialize)]
struct ChatLine {
    #[serde(default)]
    message: Option<ChatLineMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatLineMessage {
    #[serde(default)]
    content: String,
}

impl OllamaChat {
    /// 새 클라이언트 생성
    ///
    /// 생성 시간이 길 수 있으므로 전체 타임아웃 대신 연결 타임아웃만 둡니다.
    pub fn new(host: &Url) -> Result<Self> {
        let endpoint = host
            .join("api/chat")
            .context("Failed to build chat endpoint URL")?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn stream_chat(&self, model: &str, messages: &[PromptMessage]) -> Result<ChatStream> {
        let request = ChatRequest {
            model,
            messages,
            stream: true,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .context("Failed to send chat request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ChatLine>(&body)
                .ok()
                .and_then(|l| l.error)
                .unwrap_or(body);
            anyhow::bail!("Ollama chat error ({}): {}", status, message);
        }

        let bytes = response.bytes_stream().boxed();

        // (바이트 스트림, 줄 버퍼, 대기 중인 조각, 종료 여부)
        let state = (bytes, LineBuffer::default(), VecDeque::new(), false);

        let chunks = stream::unfold(state, |(mut bytes, mut buffer, mut pending, mut eof)| async move {
            loop {
                if let Some(item) = pending.pop_front() {
                    return Some((item, (bytes, buffer, pending, eof)));
                }
                if eof {
                    return None;
                }

                match bytes.next().await {
                    Some(Ok(data)) => {
                        for line in buffer.push(&data) {
                            pending.push_back(parse_line(&line));
                        }
                    }
                    Some(Err(e)) => {
                        eof = true;
                        pending.push_back(Err(anyhow::anyhow!("Chat stream interrupted: {}", e)));
                    }
                    None => {
                        eof = true;
                        if let Some(line) = buffer.finish() {
                            pending.push_back(parse_line(&line));
                        }
                    }
                }
            }
        });

        Ok(chunks.boxed())
    }
}

// ============================================================================
// NDJSON Decoding
// ============================================================================

/// 바이트 조각을 줄 단위로 모으는 버퍼
///
/// 네트워크 조각 경계가 줄 경계와 일치하지 않으므로 미완성 줄을 보관합니다.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// 바이트를 추가하고 완성된 (비어있지 않은) 줄들을 반환
    fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(data);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// 스트림 종료 시 남은 줄
    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&rest).trim().to_string();
        (!line.is_empty()).then_some(line)
    }
}

/// NDJSON 한 줄을 조각으로 변환
fn parse_line(line: &str) -> Result<ChatChunk> {
    let parsed: ChatLine = serde_json::from_str(line)
        .with_context(|| format!("Failed to parse chat stream line: {}", line))?;

    if let Some(error) = parsed.error {
        anyhow::bail!("Model error: {}", error);
    }

    Ok(ChatChunk {
        content: parsed.message.map(|m| m.content).unwrap_or_default(),
        done: parsed.done,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_split_across_chunks() {
        let mut buffer = LineBuffer::default();

        let first = buffer.push(br#"{"message":{"content":"Hel"#);
        assert!(first.is_empty());

        let second = buffer.push(b"lo\"},\"done\":false}\n{\"done\":true}\n");
        assert_eq!(second.len(), 2);
        assert_eq!(second[0], r#"{"message":{"content":"Hello"},"done":false}"#);
        assert_eq!(second[1], r#"{"done":true}"#);

        assert!(buffer.finish().is_none());
    }

    #[test]
    fn test_line_buffer_finish_returns_tail() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"\n\n{\"done\":true}").is_empty());
        assert_eq!(buffer.finish().as_deref(), Some(r#"{"done":true}"#));
    }

    #[test]
    fn test_parse_line_fragment_and_done() {
        let chunk =
            parse_line(r#"{"model":"llama3.2","message":{"role":"assistant","content":"Hi"},"done":false}"#)
                .unwrap();
        assert_eq!(
            chunk,
            ChatChunk {
                content: "Hi".to_string(),
                done: false
            }
        );

        let last = parse_line(r#"{"model":"llama3.2","message":{"role":"assistant","content":""},"done":true}"#)
            .unwrap();
        assert!(last.done);
        assert!(last.content.is_empty());
    }

    #[test]
    fn test_parse_line_error() {
        let err = parse_line(r#"{"error":"model 'nope' not found"}"#).unwrap_err();
        assert!(err.to_string().contains("not found"));

        assert!(parse_line("not json").is_err());
    }

    #[test]
    fn test_request_serialization() {
        let messages = vec![PromptMessage::system("rules"), PromptMessage::user("question")];
        let request = ChatRequest {
            model: "llama3.2",
            messages: &messages,
            stream: true,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "llama3.2");
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "question");
    }

    #[test]
    fn test_endpoint_join() {
        let host = Url::parse("http://ollama:11434/").unwrap();
        let chat = OllamaChat::new(&host).unwrap();
        assert_eq!(chat.endpoint().as_str(), "http://ollama:11434/api/chat");
    }
}
