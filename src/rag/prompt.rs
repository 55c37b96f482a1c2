//! 프롬프트 조립
//!
//! 검색 문서가 있으면 문서 블록으로 감싼 근거 프롬프트를,
//! 없으면 질문만 담은 프롬프트를 만듭니다. 항상 메시지 2개입니다.

use crate::llm::PromptMessage;

/// 고정 시스템 지시문 (모델 동작 재현성을 위해 문구를 바꾸지 않습니다)
pub const SYSTEM_INSTRUCTION: &str = "You are an AI assistant providing information about documents as a source of truth. \
You have access to documents. \
When you cannot access a document, you provide a response to your best of ability. \
Do not confuse this with any other companies. \
Only use information from the provided documents. \
Do not add any external knowledge or make assumptions.";

/// 문서들을 번호 붙은 START/END 블록으로 감싸 연결
pub fn format_context(docs: &[String]) -> String {
    docs.iter()
        .enumerate()
        .map(|(i, doc)| {
            let n = i + 1;
            format!("=== DOCUMENT {n} START ===\n{doc}\n=== DOCUMENT {n} END ===\n")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 모델에 보낼 메시지 2개 생성
pub fn build_prompt(question: &str, docs: &[String]) -> Vec<PromptMessage> {
    if docs.is_empty() {
        return vec![
            PromptMessage::system(SYSTEM_INSTRUCTION),
            PromptMessage::user(question),
        ];
    }

    let context_text = format!("{}\n\n{}", SYSTEM_INSTRUCTION, format_context(docs));
    let content = format!(
        "Here are the official documents about documents as a source of truth:\n\n\
         {context_text}\n\n\
         Based only on these documents, please answer: {question}"
    );

    vec![
        PromptMessage::system(SYSTEM_INSTRUCTION),
        PromptMessage::user(content),
    ]
}
