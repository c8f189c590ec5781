//! System prompt construction

/// Build the system prompt framing the conversation.
///
/// The topic tag is opaque to the rest of the pipeline; it only shapes this
/// prompt.
#[must_use]
pub fn system_prompt(language: &str, topic: Option<&str>) -> String {
    let base = format!(
        "You are a friendly conversation partner helping the user practice {language}. \
         Reply only in {language}. Keep each reply to a few short sentences, \
         end every sentence with sentence-ending punctuation, and ask a small \
         follow-up question to keep the conversation going."
    );

    match topic {
        Some(topic) if !topic.trim().is_empty() => {
            format!("{base} Today's conversation topic: {}.", topic.trim())
        }
        _ => base,
    }
}
