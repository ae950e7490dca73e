//! Session derivation.
//!
//! A session is not stored anywhere. It is recomputed from the channel and
//! chat identifiers, so the same sender on the same channel lands in the
//! same conversation thread across restarts.

use sha2::{Digest, Sha256};

/// Length of a derived session id in hex characters.
pub const SESSION_ID_LEN: usize = 24;

/// Derive the session id for a chat on a channel.
///
/// `hex(sha256("{channel}:{chat_id}"))` truncated to [`SESSION_ID_LEN`].
pub fn derive_session_id(channel: &str, chat_id: &str) -> String {
    let digest = Sha256::digest(format!("{channel}:{chat_id}").as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(SESSION_ID_LEN);
    id
}
