//! safe-merge: merge a GitHub PR through branch protection, safely
//!
//! The base branch's protection is snapshotted, relaxed just enough for the
//! merge, and restored afterwards on every exit path.
//!
//! ```text
//! INIT -> CHECKS_VERIFIED -> PROTECTIONS_RELAXED -> AWAITING_MERGEABLE -> MERGED
//!                                     \________________\___________________\___-> PROTECTIONS_RESTORED
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod merge;
pub mod platform;
pub mod progress;
pub mod types;
