//! Plain-text conversation log

use std::fmt::Write as _;
use std::path::Path;

use super::chat::ChatMessage;
use crate::Result;

/// Render messages as `Role:\ncontent\n\n` blocks
#[must_use]
pub fn render_conversation(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    for message in messages {
        let _ = write!(out, "{}:\n{}\n\n", message.role.label(), message.content);
    }
    out
}

/// Overwrite `path` with the rendered conversation
///
/// # Errors
///
/// Returns error if the file cannot be written
pub async fn save_conversation(messages: &[ChatMessage], path: &Path) -> Result<()> {
    tokio::fs::write(path, render_conversation(messages)).await?;
    tracing::debug!(path = %path.display(), messages = messages.len(), "saved conversation");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_capitalized_roles() {
        let messages = vec![
            ChatMessage::system("You are NAO."),
            ChatMessage::user("Hi"),
            ChatMessage::assistant("Hello!"),
        ];

        assert_eq!(
            render_conversation(&messages),
            "System:\nYou are NAO.\n\nUser:\nHi\n\nAssistant:\nHello!\n\n"
        );
    }

    #[tokio::test]
    async fn save_overwrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversation_context.txt");
        std::fs::write(&path, "stale").unwrap();

        save_conversation(&[ChatMessage::user("again")], &path)
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "User:\nagain\n\n");
    }
}
