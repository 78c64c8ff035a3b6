//! Persistence ports consumed by the core
//!
//! The core never persists anything itself; posts, votes and promotional ads
//! live behind these traits. Any backend can be plugged in by implementing
//! them; [`MemoryStore`] is the in-process reference implementation used by
//! the binary and the test-suite.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::protocol::messages::{Post, VoteCounts, VoteType};

/// Outcome of recording a vote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteAction {
    /// A fresh vote was recorded
    Added,
    /// The voter repeated their existing vote, toggling it off
    Removed,
    /// The voter flipped to the opposite vote
    Updated,
}

/// A promotional ad managed through the admin surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ad {
    pub id: String,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub created_at: u64,
}

/// Data persistence contract for posts and votes.
///
/// A voter holds at most one vote per post; the store enforces that
/// uniqueness and the moderation trigger depends on it being accurate.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Persist a new post. IDs are pre-generated uniquely by the core.
    async fn create_post(&self, post: &Post) -> anyhow::Result<()>;

    /// The most recent posts, newest first, at most `limit`.
    async fn recent_posts(&self, limit: usize) -> anyhow::Result<Vec<Post>>;

    /// Record a vote. Repeating a vote removes it; the opposite vote
    /// overwrites it.
    async fn add_vote(
        &self,
        post_id: &str,
        voter_session_id: &str,
        vote_type: VoteType,
    ) -> anyhow::Result<VoteAction>;

    /// Current vote tallies for a post.
    async fn post_vote_counts(&self, post_id: &str) -> anyhow::Result<VoteCounts>;

    /// Number of distinct voters currently holding a downvote on a post.
    async fn downvoter_count(&self, post_id: &str) -> anyhow::Result<u64>;

    /// Delete a post. Returns whether a row was actually removed, making the
    /// call safe to repeat.
    async fn delete_post(&self, post_id: &str) -> anyhow::Result<bool>;
}

/// Promotional ad CRUD for the admin surface.
#[async_trait]
pub trait AdStore: Send + Sync {
    async fn create_ad(&self, ad: &Ad) -> anyhow::Result<()>;
    async fn list_ads(&self) -> anyhow::Result<Vec<Ad>>;
    async fn delete_ad(&self, ad_id: &str) -> anyhow::Result<bool>;
}
