//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. The budget is
//! an approximate limit, so the estimate only has to be conservative and
//! deterministic, not exact.

use opsclaw_core::message::Message;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Estimate tokens for a single message including per-message overhead.
///
/// Each message costs ~4 tokens of overhead for role name, delimiters,
/// and formatting markers in the API wire format.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let overhead = 4;
    overhead + estimate_tokens(&message.content)
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(estimate_tokens("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn six_hundred_words() {
        let text = "word ".repeat(600);
        assert_eq!(estimate_tokens(&text), 750);
    }

    #[test]
    fn message_includes_overhead() {
        let msg = Message::user("test");
        assert_eq!(estimate_message_tokens(&msg), 5);
    }

    #[test]
    fn multiple_messages() {
        let msgs = vec![
            Message::system("restart nginx"), // 13 chars → 4 + 4
            Message::user("ok"),              // 2 chars → 1 + 4
        ];
        assert_eq!(estimate_messages_tokens(&msgs), 13);
    }
}
