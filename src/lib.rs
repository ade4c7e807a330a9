// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod abuse;
pub mod api;
pub mod conversation;
pub mod defaults;
pub mod error;
pub mod keywords;
pub mod matcher;
pub mod orchestrator;
pub mod picker;
pub mod ratelimit;
pub mod scam;
pub mod special;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{build_state, create_router, AppState};
pub use crate::orchestrator::{ConversationResponse, Orchestrator, Outcome};

use sha2::{Digest, Sha256};

/// Short stable pseudonym for a user id, safe for log lines.
pub fn anon_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest[..6].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anon_hash_is_stable_and_short() {
        let a = anon_hash("user-42");
        let b = anon_hash("user-42");
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
        assert_ne!(a, anon_hash("user-43"));
    }
}
