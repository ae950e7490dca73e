//! Allowlist policies: per-channel sender validation.
//!
//! Unlike a deny-by-default pairing model, an operator agent is usually
//! deployed for one person on a private channel, so an empty list means the
//! channel is open. Listing any sender restricts it to exactly those senders.

use opsclaw_config::ChannelConfig;

/// Result of checking a sender against the allowlist.
#[derive(Debug, Clone, PartialEq)]
pub enum SenderCheckResult {
    /// Sender is on the list (or the list is `*`)
    Allowed,
    /// No allowlist configured, so every sender is accepted
    Open,
    /// Sender is denied
    Denied { sender_id: String, reason: String },
}

impl SenderCheckResult {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, SenderCheckResult::Denied { .. })
    }
}

/// Unified allowlist policy enforcement.
pub struct AllowlistPolicy;

impl AllowlistPolicy {
    /// Check a sender against a bare list of allowed ids.
    ///
    /// Rules:
    /// - If `allowed` is empty → allow all
    /// - If `allowed` contains `"*"` → allow all
    /// - Otherwise, sender must be in the list
    pub fn check_list(allowed: &[String], sender_id: &str) -> SenderCheckResult {
        if allowed.is_empty() {
            return SenderCheckResult::Open;
        }

        if allowed.iter().any(|u| u == "*" || u == sender_id) {
            SenderCheckResult::Allowed
        } else {
            SenderCheckResult::Denied {
                sender_id: sender_id.into(),
                reason: format!(
                    "Sender '{}' not in allowlist ({} users configured)",
                    sender_id,
                    allowed.len()
                ),
            }
        }
    }

    /// Check if a sender is allowed for a given channel configuration.
    ///
    /// A missing channel section is treated as an enabled channel with an
    /// empty list. A disabled channel denies everyone.
    pub fn check_sender(config: Option<&ChannelConfig>, sender_id: &str) -> SenderCheckResult {
        let Some(config) = config else {
            return SenderCheckResult::Open;
        };

        if !config.enabled {
            return SenderCheckResult::Denied {
                sender_id: sender_id.into(),
                reason: "Channel is disabled".into(),
            };
        }

        Self::check_list(&config.allowed_users, sender_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config(enabled: bool, users: Vec<&str>) -> ChannelConfig {
        ChannelConfig {
            enabled,
            allowed_users: users.into_iter().map(String::from).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn empty_allowlist_allows_all() {
        let config = make_config(true, vec![]);
        let result = AllowlistPolicy::check_sender(Some(&config), "user123");
        assert_eq!(result, SenderCheckResult::Open);
        assert!(result.is_allowed());
    }

    #[test]
    fn missing_channel_config_is_open() {
        assert!(AllowlistPolicy::check_sender(None, "anyone").is_allowed());
    }

    #[test]
    fn wildcard_allows_all() {
        let config = make_config(true, vec!["*"]);
        assert_eq!(
            AllowlistPolicy::check_sender(Some(&config), "anyone"),
            SenderCheckResult::Allowed
        );
    }

    #[test]
    fn specific_user_allowed() {
        let config = make_config(true, vec!["user123", "user456"]);
        assert_eq!(
            AllowlistPolicy::check_sender(Some(&config), "user456"),
            SenderCheckResult::Allowed
        );
    }

    #[test]
    fn unknown_user_denied() {
        let config = make_config(true, vec!["user123"]);
        let result = AllowlistPolicy::check_sender(Some(&config), "intruder");
        match result {
            SenderCheckResult::Denied { sender_id, .. } => {
                assert_eq!(sender_id, "intruder");
            }
            _ => panic!("Expected denied"),
        }
    }

    #[test]
    fn disabled_channel_denies() {
        let config = make_config(false, vec!["*"]);
        let result = AllowlistPolicy::check_sender(Some(&config), "user123");
        match result {
            SenderCheckResult::Denied { reason, .. } => {
                assert!(reason.contains("disabled"));
            }
            _ => panic!("Expected denied"),
        }
    }

    #[test]
    fn bare_list_check() {
        let allowed = vec!["ops@example.com".to_string()];
        assert!(AllowlistPolicy::check_list(&allowed, "ops@example.com").is_allowed());
        assert!(!AllowlistPolicy::check_list(&allowed, "other@example.com").is_allowed());
        assert!(AllowlistPolicy::check_list(&[], "x").is_allowed());
    }
}
