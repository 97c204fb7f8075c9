/// Maximum chat line length (bytes) the feed relays to a game server.
pub const MAX_CHAT_MESSAGE_LENGTH: usize = 256;

/// Validate an outbound chat line. Must be non-blank and under the length limit.
pub fn validate_chat_message(content: &str) -> Result<(), String> {
    if content.trim().is_empty() {
        return Err("Message cannot be empty".into());
    }
    if content.len() > MAX_CHAT_MESSAGE_LENGTH {
        return Err(format!(
            "Message too long (max {} bytes)",
            MAX_CHAT_MESSAGE_LENGTH
        ));
    }
    if content.chars().any(|c| c == '\n' || c == '\r') {
        return Err("Message cannot span multiple lines".into());
    }
    Ok(())
}
