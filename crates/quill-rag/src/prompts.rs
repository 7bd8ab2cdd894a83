//! Grounded prompt assembly

use quill_core::{Message, RetrievedEvidence};

/// The exact answer for questions the documents do not cover
pub const REFUSAL_SENTENCE: &str = "I cannot answer this question because it is not covered in the uploaded documents. \
Please ask a question related to the documents you have uploaded.";

/// Stands in for the evidence block when retrieval found nothing
pub const NO_CONTEXT_MARKER: &str =
    "No external context was retrieved for this question. This means no relevant documents were found.";

/// Fixed system instructions sent first in every prompt
pub const GROUNDING_POLICY: &str = "You are a study assistant. You answer questions strictly from the course \
documents supplied in the Context section of the user's message.

Rules:
- Use only facts stated in the supplied sources. Never add outside or general knowledge, even if you know the answer.
- After each statement, cite the source it comes from as (Source N), using the labels given in the Context section.
- If the sources do not contain the answer, or the Context says no context was retrieved, reply with exactly this \
sentence and nothing else: \"I cannot answer this question because it is not covered in the uploaded documents. \
Please ask a question related to the documents you have uploaded.\"
- Earlier turns of the conversation help you understand follow-up questions. They are not sources.";

fn source_header(label: usize, evidence: &RetrievedEvidence) -> String {
    match evidence.page {
        Some(page) => format!("[Source {}] ({}, page {})", label, evidence.title, page),
        None => format!("[Source {}] ({})", label, evidence.title),
    }
}

/// Evidence block labelled `Source 1..N` in retrieval rank order
pub fn format_evidence(evidence: &[RetrievedEvidence]) -> String {
    if evidence.is_empty() {
        return NO_CONTEXT_MARKER.to_string();
    }
    evidence
        .iter()
        .enumerate()
        .map(|(i, e)| format!("{}\n{}", source_header(i + 1, e), e.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Messages for one generation call: policy, then history (oldest first),
/// then the evidence block together with the question.
pub fn assemble_prompt(history: Vec<Message>, evidence: &[RetrievedEvidence], query: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(GROUNDING_POLICY));
    messages.extend(history);
    messages.push(Message::user(format!(
        "Context:\n{}\n\nQuestion: {}",
        format_evidence(evidence),
        query
    )));
    messages
}
