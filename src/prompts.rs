//! Prompts for the chat-model classifier backend.
//!
//! Kept in one place so the scoring contract the parser in
//! [`crate::pipeline::llm`] relies on is visible next to the text that
//! establishes it.

/// System prompt for scoring labels independently.
pub const CLASSIFIER_SYSTEM_PROMPT: &str = r#"You are a zero-shot multi-label text classifier.

For EACH candidate label, estimate independently the probability (0.0 to 1.0) that the text is about that topic.
Scores are independent: several labels may be high, or none. They do NOT need to sum to 1.

Output ONLY a JSON object mapping every candidate label, spelled exactly as given, to its score.
Example: {"python": 0.91, "docker": 0.08}
Do NOT wrap the JSON in fences. Do NOT add commentary."#;

/// Build the user message listing the labels and the text.
pub fn classifier_user_prompt(text: &str, labels: &[String]) -> String {
    let list = labels
        .iter()
        .map(|l| format!("- {l}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Candidate labels:\n{list}\n\nText:\n\"\"\"{text}\"\"\"")
}
