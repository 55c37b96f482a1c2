//! CLI 모듈
//!
//! docchat-rag CLI 명령어 정의 및 구현

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::app::Services;
use crate::config::AppConfig;
use crate::history::{ChatTurn, Role};
use crate::rag::{AnswerEvent, AnswerRequest};
use crate::server::{decode_text, run_server};

/// CLI에서 쓰는 기본 사용자
const LOCAL_USER: &str = "local";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "docchat-rag")]
#[command(version, about = "문서 기반 RAG 채팅 백엔드", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// HTTP 서버 실행
    Serve {
        /// 바인드 주소 (기본: DOCCHAT_BIND)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// 질문하고 답변을 스트리밍으로 출력
    Ask {
        /// 질문
        question: String,

        /// 채팅 모델 (기본: DOCCHAT_CHAT_MODEL)
        #[arg(short, long)]
        model: Option<String>,

        /// 이어서 대화할 세션 ID
        #[arg(long)]
        chat_id: Option<String>,

        /// 사용자 ID
        #[arg(short, long, default_value = LOCAL_USER)]
        user: String,
    },

    /// 텍스트 또는 파일을 인덱스에 추가
    Ingest {
        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 텍스트 파일 경로
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// 저장된 대화 관리
    Chats {
        #[command(subcommand)]
        action: ChatsAction,

        /// 사용자 ID
        #[arg(short, long, default_value = LOCAL_USER, global = true)]
        user: String,
    },

    /// 상태 확인
    Status,
}

#[derive(Subcommand)]
pub enum ChatsAction {
    /// 세션 목록
    List,

    /// 세션 내용 출력
    Show {
        /// 세션 ID
        id: String,
    },

    /// 제목 변경
    Rename {
        /// 세션 ID
        id: String,

        /// 새 제목
        title: String,
    },

    /// 세션 삭제
    Delete {
        /// 세션 ID
        id: String,
    },
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::from_env().context("설정 로드 실패")?;

    match cli.command {
        Commands::Serve { bind } => cmd_serve(config, bind).await,
        Commands::Ask {
            question,
            model,
            chat_id,
            user,
        } => cmd_ask(config, question, model, chat_id, user).await,
        Commands::Ingest { text, file } => cmd_ingest(config, text, file).await,
        Commands::Chats { action, user } => cmd_chats(config, action, &user).await,
        Commands::Status => cmd_status(config).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 서버 명령어 (serve)
async fn cmd_serve(mut config: AppConfig, bind: Option<String>) -> Result<()> {
    if let Some(bind) = bind {
        config.bind = bind;
    }
    let bind = config.bind.clone();

    let services = Services::open(config).await.context("서비스 초기화 실패")?;

    println!("[*] 인덱스: {}", services.config.index_name);
    println!("[*] 모델: {}", services.config.chat_model);

    run_server(services.app_state(), &bind).await
}

/// 질문 명령어 (ask)
///
/// `--chat-id`가 있으면 저장된 대화에 이어서 질문합니다.
async fn cmd_ask(
    config: AppConfig,
    question: String,
    model: Option<String>,
    chat_id: Option<String>,
    user: String,
) -> Result<()> {
    let services = Services::open(config).await.context("서비스 초기화 실패")?;

    let mut messages = match chat_id.as_deref() {
        Some(id) => services
            .store
            .get_session(&user, id)
            .await
            .context("대화 조회 실패")?
            .ok_or_else(|| anyhow::anyhow!("대화 '{}'를 찾을 수 없습니다", id))?
            .messages,
        None => Vec::new(),
    };
    messages.push(ChatTurn::user(question));

    let mut rx = services
        .orchestrator
        .answer(AnswerRequest {
            user_id: user,
            messages,
            model,
            chat_id,
            title: None,
        })
        .await?;

    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        let terminal = event.is_terminal();
        match event {
            AnswerEvent::Fragment(text) => {
                print!("{}", text);
                stdout.flush()?;
            }
            AnswerEvent::Error(e) => {
                println!();
                bail!("답변 생성 실패: {}", e);
            }
            AnswerEvent::Done { chat_id } => {
                println!("\n");
                match chat_id {
                    Some(id) => println!("[OK] 대화 저장됨: {}", id),
                    None => println!("[!] 대화 저장 실패 (로그 확인)"),
                }
            }
        }
        if terminal {
            break;
        }
    }

    Ok(())
}

/// 수집 명령어 (ingest)
async fn cmd_ingest(config: AppConfig, text: Option<String>, file: Option<PathBuf>) -> Result<()> {
    let content = match (text, file) {
        (Some(text), None) => text,
        (None, Some(path)) => {
            println!("[*] 파일 읽는 중: {}", path.display());
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("파일 읽기 실패: {}", path.display()))?;
            println!("    크기: {}", format_bytes(bytes.len()));
            decode_text(&bytes)
        }
        (Some(_), Some(_)) => bail!("--text 와 --file 중 하나만 지정해야 합니다"),
        (None, None) => bail!("--text 또는 --file 중 하나를 지정해야 합니다"),
    };

    let services = Services::open(config).await.context("서비스 초기화 실패")?;

    println!("[*] 인덱싱 중: {}", services.indexer.index_name());
    let report = services.indexer.index_text(&content).await?;

    if report.recreated {
        println!("[!] 삽입 실패로 인덱스를 재생성했습니다 (기존 문서 삭제됨)");
    }
    match report.document_count {
        Some(count) => println!("[OK] 인덱싱 완료 (문서 {} 건)", count),
        None => println!("[OK] 인덱싱 완료"),
    }
    if !report.verified {
        println!("[!] 검증 검색에서 문서를 찾지 못했습니다");
    }

    Ok(())
}

/// 대화 관리 명령어 (chats)
async fn cmd_chats(config: AppConfig, action: ChatsAction, user: &str) -> Result<()> {
    let services = Services::open(config).await.context("서비스 초기화 실패")?;
    let store = &services.store;

    match action {
        ChatsAction::List => {
            let chats = store.list_sessions(user).await.context("대화 목록 조회 실패")?;
            if chats.is_empty() {
                println!("[!] 저장된 대화가 없습니다.");
                return Ok(());
            }

            println!("[OK] 저장된 대화 ({} 건):\n", chats.len());
            for chat in chats {
                println!("  {}  {}", chat.id, truncate_text(&chat.title, 40));
                println!("        {}", chat.updated_at.format("%Y-%m-%d %H:%M"));
            }
        }
        ChatsAction::Show { id } => {
            let session = store
                .get_session(user, &id)
                .await
                .context("대화 조회 실패")?
                .ok_or_else(|| anyhow::anyhow!("대화 '{}'를 찾을 수 없습니다", id))?;

            println!("# {}\n", session.title);
            for turn in &session.messages {
                let label = match turn.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                println!("[{}] {}", label, turn.content);
                if let Some(ref context) = turn.context {
                    for doc in context {
                        println!("    - {}", truncate_text(doc, 80));
                    }
                }
                println!();
            }
        }
        ChatsAction::Rename { id, title } => {
            match store.rename_session(user, &id, &title).await.context("제목 변경 실패")? {
                Some(_) => println!("[OK] 제목 변경됨: {}", title),
                None => bail!("대화 '{}'를 찾을 수 없습니다", id),
            }
        }
        ChatsAction::Delete { id } => {
            if store.delete_session(user, &id).await.context("대화 삭제 실패")? {
                println!("[OK] 대화 {} 삭제됨", id);
            } else {
                println!("[!] 삭제할 대화를 찾을 수 없습니다");
            }
        }
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: AppConfig) -> Result<()> {
    println!("docchat-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!("[*] Ollama: {}", config.ollama_host);
    println!(
        "[*] 임베딩: {} ({} 차원)",
        config.embed_model, config.embed_dimension
    );
    println!("[*] 채팅 모델: {}", config.chat_model);
    println!("[*] 검색 임계값: {:?}", config.retrieval.min_scores);

    let index_name = config.index_name.clone();
    let services = match Services::open(config).await {
        Ok(services) => services,
        Err(e) => {
            println!("[!] 서비스 초기화 실패: {:#}", e);
            return Ok(());
        }
    };

    match services.index.count(&index_name).await {
        Ok(0) => println!("[!] 인덱스 '{}': 문서 없음", index_name),
        Ok(count) => println!("[OK] 인덱스 '{}': {} 건", index_name, count),
        Err(e) => println!("[!] 인덱스 통계 조회 실패: {}", e),
    }

    match services.store.list_sessions(LOCAL_USER).await {
        Ok(chats) => println!("[OK] 저장된 대화 ({}): {} 건", LOCAL_USER, chats.len()),
        Err(e) => tracing::debug!("대화 목록 조회 실패: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
