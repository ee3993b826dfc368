//! Episodic decision-audit core for automated race trading.
//!
//! Every automated decision is recorded as a deterministic, content-addressed
//! [`schema::Episode`] with checksummed, append-only artifacts. Read-only
//! critics audit those records after the fact and may only *propose* fixes.

pub mod audit;
pub mod canonical;
pub mod config;
pub mod critics;
pub mod doctrine;
pub mod episode;
pub mod learning;
pub mod logging;
pub mod memory_index;
pub mod schema;
pub mod store;

pub use audit::{audit_batch, audit_episode, AuditReport};
pub use config::AuditConfig;
pub use doctrine::{Critic, DoctrineViolation, EpisodeView};
pub use episode::{
    build_episode, finalize_episode, replay_episode, validate_episode_integrity, write_episode_artifacts,
    EpisodeError, IntegrityReport,
};
