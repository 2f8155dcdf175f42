//! Report delivery.
//!
//! The scan hands one formatted text to a `Notifier`. Delivery failure is
//! logged by the caller and never fails the run.

pub mod telegram;

use async_trait::async_trait;
use tracing::info;

use crate::types::ScanError;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), ScanError>;
}

/// Fallback notifier that writes the report to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<(), ScanError> {
        info!("Scan report\n{text}");
        Ok(())
    }
}

/// Split `text` into chunks of at most `limit` characters, breaking at
/// line boundaries where possible.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.lines() {
        let line_len = line.chars().count();

        // Lines that cannot fit on their own are hard-split.
        if line_len > limit {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(limit) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        let sep = usize::from(!current.is_empty());
        if current_len + sep + line_len > limit {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_message_is_one_chunk() {
        assert_eq!(split_message("a\nb", 100), vec!["a\nb".to_string()]);
    }

    #[test]
    fn test_splits_at_line_boundaries() {
        let text = "aaaa\nbbbb\ncccc";
        let chunks = split_message(text, 9);
        assert_eq!(chunks, vec!["aaaa\nbbbb".to_string(), "cccc".to_string()]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 9));
    }

    #[test]
    fn test_hard_splits_long_line() {
        let chunks = split_message("xx\nabcdefghij", 4);
        assert_eq!(chunks, vec!["xx", "abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        let text = "ééé\nééé";
        assert_eq!(split_message(text, 7), vec![text.to_string()]);
    }

    #[test]
    fn test_empty_text() {
        assert!(split_message("", 10).is_empty());
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        assert!(LogNotifier.send("report").await.is_ok());
    }
}
