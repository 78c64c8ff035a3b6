//! Administrative surface: post removal, statistics, promotional ads
//!
//! Session and password checking for administrators happens outside this
//! crate; whoever holds an [`AdminApi`] is already trusted. Admin deletions
//! reuse the same deletion broadcast as auto-moderation, with the reason set
//! apart on the wire.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::current_timestamp;
use crate::error::Result;
use crate::generate_post_id;
use crate::protocol::messages::DeleteReason;
use crate::registry::ParticipantRegistry;
use crate::server::router::FanoutRouter;
use crate::store::{Ad, AdStore, PostStore};

/// Live server statistics for the admin dashboard
#[derive(Debug, Clone)]
pub struct AdminStats {
    /// Currently open connections
    pub connections: usize,
    /// Participant count per normalized channel
    pub channels: HashMap<String, usize>,
    /// Seconds since this admin handle was created (process lifetime proxy)
    pub uptime_secs: u64,
}

/// Handle for administrative operations
pub struct AdminApi {
    registry: Arc<ParticipantRegistry>,
    router: Arc<FanoutRouter>,
    posts: Arc<dyn PostStore>,
    ads: Arc<dyn AdStore>,
    started_at: Instant,
}

impl AdminApi {
    pub fn new(
        registry: Arc<ParticipantRegistry>,
        router: Arc<FanoutRouter>,
        posts: Arc<dyn PostStore>,
        ads: Arc<dyn AdStore>,
    ) -> Self {
        Self {
            registry,
            router,
            posts,
            ads,
            started_at: Instant::now(),
        }
    }

    /// Delete a post on behalf of an administrator.
    ///
    /// Returns whether the post still existed. The deletion broadcast goes to
    /// every connection; deleting an already-gone post is a quiet no-op.
    pub async fn delete_post(&self, post_id: &str) -> Result<bool> {
        let deleted = self.posts.delete_post(post_id).await?;
        if deleted {
            info!("Admin removed post {}", post_id);
            self.router
                .broadcast_deletion(post_id, DeleteReason::Admin, None)
                .await;
        }
        Ok(deleted)
    }

    /// Live connection and channel statistics
    pub async fn stats(&self) -> AdminStats {
        AdminStats {
            connections: self.registry.len().await,
            channels: self.registry.channel_counts().await,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    /// Create a promotional ad
    pub async fn create_ad(
        &self,
        title: String,
        message: String,
        image: Option<String>,
        link: Option<String>,
    ) -> Result<Ad> {
        let ad = Ad {
            id: generate_post_id(),
            title,
            message,
            image,
            link,
            created_at: current_timestamp(),
        };
        self.ads.create_ad(&ad).await?;
        info!("Admin created ad {} ({})", ad.id, ad.title);
        Ok(ad)
    }

    /// List all promotional ads
    pub async fn list_ads(&self) -> Result<Vec<Ad>> {
        Ok(self.ads.list_ads().await?)
    }

    /// Delete a promotional ad; returns whether it existed
    pub async fn delete_ad(&self, ad_id: &str) -> Result<bool> {
        let deleted = self.ads.delete_ad(ad_id).await?;
        if deleted {
            info!("Admin removed ad {}", ad_id);
        }
        Ok(deleted)
    }
}
