//! In-process reference store
//!
//! Backs the binary and the test-suite. Posts are kept in insertion order,
//! which is also chronological order; votes are keyed by (post, voter) so the
//! one-vote-per-pair rule holds by construction.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Ad, AdStore, PostStore, VoteAction};
use crate::protocol::messages::{Post, VoteCounts, VoteType};

/// In-memory implementation of [`PostStore`] and [`AdStore`]
pub struct MemoryStore {
    posts: RwLock<Vec<Post>>,
    votes: RwLock<HashMap<(String, String), VoteType>>,
    ads: RwLock<Vec<Ad>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            posts: RwLock::new(Vec::new()),
            votes: RwLock::new(HashMap::new()),
            ads: RwLock::new(Vec::new()),
        }
    }

    /// Number of stored posts
    pub async fn post_count(&self) -> usize {
        self.posts.read().await.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PostStore for MemoryStore {
    async fn create_post(&self, post: &Post) -> anyhow::Result<()> {
        let mut posts = self.posts.write().await;
        posts.push(post.clone());
        Ok(())
    }

    async fn recent_posts(&self, limit: usize) -> anyhow::Result<Vec<Post>> {
        let posts = self.posts.read().await;
        Ok(posts.iter().rev().take(limit).cloned().collect())
    }

    async fn add_vote(
        &self,
        post_id: &str,
        voter_session_id: &str,
        vote_type: VoteType,
    ) -> anyhow::Result<VoteAction> {
        let key = (post_id.to_string(), voter_session_id.to_string());
        let mut votes = self.votes.write().await;

        match votes.get(&key) {
            Some(existing) if *existing == vote_type => {
                votes.remove(&key);
                Ok(VoteAction::Removed)
            }
            Some(_) => {
                votes.insert(key, vote_type);
                Ok(VoteAction::Updated)
            }
            None => {
                votes.insert(key, vote_type);
                Ok(VoteAction::Added)
            }
        }
    }

    async fn post_vote_counts(&self, post_id: &str) -> anyhow::Result<VoteCounts> {
        let votes = self.votes.read().await;
        let mut counts = VoteCounts::default();
        for ((voted_post, _), vote_type) in votes.iter() {
            if voted_post == post_id {
                match vote_type {
                    VoteType::Up => counts.up += 1,
                    VoteType::Down => counts.down += 1,
                }
            }
        }
        Ok(counts)
    }

    async fn downvoter_count(&self, post_id: &str) -> anyhow::Result<u64> {
        let votes = self.votes.read().await;
        let count = votes
            .iter()
            .filter(|((voted_post, _), vote_type)| {
                voted_post == post_id && **vote_type == VoteType::Down
            })
            .count();
        Ok(count as u64)
    }

    async fn delete_post(&self, post_id: &str) -> anyhow::Result<bool> {
        let mut posts = self.posts.write().await;
        let before = posts.len();
        posts.retain(|p| p.id != post_id);
        let deleted = posts.len() < before;

        if deleted {
            let mut votes = self.votes.write().await;
            votes.retain(|(voted_post, _), _| voted_post != post_id);
        }

        Ok(deleted)
    }
}

#[async_trait]
impl AdStore for MemoryStore {
    async fn create_ad(&self, ad: &Ad) -> anyhow::Result<()> {
        let mut ads = self.ads.write().await;
        ads.push(ad.clone());
        Ok(())
    }

    async fn list_ads(&self) -> anyhow::Result<Vec<Ad>> {
        let ads = self.ads.read().await;
        Ok(ads.clone())
    }

    async fn delete_ad(&self, ad_id: &str) -> anyhow::Result<bool> {
        let mut ads = self.ads.write().await;
        let before = ads.len();
        ads.retain(|a| a.id != ad_id);
        Ok(ads.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{current_timestamp, generate_post_id};

    fn post(channel: &str) -> Post {
        Post {
            id: generate_post_id(),
            session_id: "author".to_string(),
            display_name: "Anonymous".to_string(),
            message: "hello".to_string(),
            image: None,
            channel: channel.to_string(),
            latitude: 0.0,
            longitude: 0.0,
            timestamp: current_timestamp(),
        }
    }

    #[tokio::test]
    async fn test_recent_posts_newest_first_with_limit() {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let p = post("");
            ids.push(p.id.clone());
            store.create_post(&p).await.unwrap();
        }

        let recent = store.recent_posts(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        // Newest first: the last created post leads
        assert_eq!(recent[0].id, ids[4]);
        assert_eq!(recent[2].id, ids[2]);
    }

    #[tokio::test]
    async fn test_vote_toggle_and_flip_semantics() {
        let store = MemoryStore::new();
        let p = post("");
        store.create_post(&p).await.unwrap();

        // Fresh vote
        let action = store.add_vote(&p.id, "v1", VoteType::Up).await.unwrap();
        assert_eq!(action, VoteAction::Added);
        assert_eq!(
            store.post_vote_counts(&p.id).await.unwrap(),
            VoteCounts { up: 1, down: 0 }
        );

        // Same vote again toggles it off and counts return to the pre-vote state
        let action = store.add_vote(&p.id, "v1", VoteType::Up).await.unwrap();
        assert_eq!(action, VoteAction::Removed);
        assert_eq!(
            store.post_vote_counts(&p.id).await.unwrap(),
            VoteCounts::default()
        );

        // Flip: up then down overwrites
        store.add_vote(&p.id, "v1", VoteType::Up).await.unwrap();
        let action = store.add_vote(&p.id, "v1", VoteType::Down).await.unwrap();
        assert_eq!(action, VoteAction::Updated);
        assert_eq!(
            store.post_vote_counts(&p.id).await.unwrap(),
            VoteCounts { up: 0, down: 1 }
        );
    }

    #[tokio::test]
    async fn test_downvoter_count_is_distinct_voters() {
        let store = MemoryStore::new();
        let p = post("");
        store.create_post(&p).await.unwrap();

        store.add_vote(&p.id, "v1", VoteType::Down).await.unwrap();
        store.add_vote(&p.id, "v2", VoteType::Down).await.unwrap();
        store.add_vote(&p.id, "v3", VoteType::Up).await.unwrap();

        assert_eq!(store.downvoter_count(&p.id).await.unwrap(), 2);

        // A voter flipping away reduces the count
        store.add_vote(&p.id, "v2", VoteType::Up).await.unwrap();
        assert_eq!(store.downvoter_count(&p.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_post_is_idempotent() {
        let store = MemoryStore::new();
        let p = post("");
        store.create_post(&p).await.unwrap();
        store.add_vote(&p.id, "v1", VoteType::Down).await.unwrap();

        assert!(store.delete_post(&p.id).await.unwrap());
        // Second delete reports zero rows affected
        assert!(!store.delete_post(&p.id).await.unwrap());
        // Votes for the deleted post are gone too
        assert_eq!(store.downvoter_count(&p.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ad_crud() {
        let store = MemoryStore::new();
        let ad = Ad {
            id: generate_post_id(),
            title: "Local pizza".to_string(),
            message: "Two for one tonight".to_string(),
            image: None,
            link: Some("https://example.com".to_string()),
            created_at: current_timestamp(),
        };

        store.create_ad(&ad).await.unwrap();
        assert_eq!(store.list_ads().await.unwrap().len(), 1);

        assert!(store.delete_ad(&ad.id).await.unwrap());
        assert!(!store.delete_ad(&ad.id).await.unwrap());
        assert!(store.list_ads().await.unwrap().is_empty());
    }
}
