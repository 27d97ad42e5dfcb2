//! # Carepass (cross-origin session authority)
//!
//! `carepass` keeps one authenticated identity consistent across three
//! independently hosted applications: the patient portal (`user` slot) and the
//! shared clinical console (`admin` and `doctor` slots). The applications share
//! a stateless token authority but no server-side session.
//!
//! ## Backend
//!
//! - [`authority`]: authenticates credentials per role and issues HS256 session
//!   tokens binding role, subject and issued-at. Validation re-checks the
//!   subject against the directory on every protected call.
//! - [`api`]: the HTTP surface (`/api/<role>/login`, `/api/<role>/session`, ...).
//!   Protected calls carry the token in a role-specific header and any failure
//!   is a uniform `401 {success:false, message}`.
//!
//! ## Client
//!
//! - [`session::handoff`]: the one-time `?token=..&type=..` redirect used to move
//!   a token to another origin.
//! - [`session::store`]: the per-origin durable store, one key per role slot,
//!   with cross-tab change notifications.
//! - [`session::context`] and [`session::reconcile`]: the in-memory session view
//!   and the loop that converges it with the store.
//! - [`session::guard`]: reachable routes derived from the context.

pub mod api;
pub mod authority;
pub mod cli;
pub mod session;
pub mod token;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Builds outside a git checkout have no hash
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with("carepass/"));
        assert!(APP_USER_AGENT.ends_with(env!("CARGO_PKG_VERSION")));
    }
}
