//! Simple in-process check of core functionality
//!
//! This module provides a minimal end-to-end exercise of the registry,
//! matching rule, store and fan-out without opening any sockets. It backs
//! the `selfcheck` command of the binary.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::matching::{MatchMode, haversine_miles, normalize_channel};
use crate::protocol::messages::{Post, SettingsUpdate, VoteType};
use crate::registry::ParticipantRegistry;
use crate::server::connection::ConnectionCommand;
use crate::server::moderation::{DEFAULT_DOWNVOTE_THRESHOLD, ModerationTrigger};
use crate::server::router::FanoutRouter;
use crate::store::{MemoryStore, PostStore};
use crate::{current_timestamp, generate_post_id};

/// Run a basic functionality check
pub async fn run_basic_check() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Starting basic chat core check...");

    check_normalization()?;
    check_registry_lifecycle().await?;
    check_fanout_filtering().await?;
    check_moderation_threshold().await?;

    info!("Basic check completed successfully!");
    Ok(())
}

fn check_normalization() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Checking channel normalization...");

    assert_eq!(normalize_channel(" General "), "general");
    assert_eq!(normalize_channel("   "), "");
    assert_eq!(normalize_channel(""), "");

    // Sanity on the distance formula the geofenced mode relies on
    let one_degree = haversine_miles(0.0, 0.0, 1.0, 0.0);
    assert!((one_degree - 69.1).abs() < 0.5);

    info!("✓ Normalization check passed");
    Ok(())
}

async fn check_registry_lifecycle() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Checking registry lifecycle...");

    let registry = ParticipantRegistry::new();
    let (tx, _rx) = mpsc::unbounded_channel();

    let participant = registry.register("check-1", tx).await;
    assert_eq!(participant.display_name, "Anonymous");
    assert_eq!(registry.len().await, 1);

    let (updated, changed) = registry
        .update(
            "check-1",
            &SettingsUpdate {
                channel: Some(" Rust ".to_string()),
                ..Default::default()
            },
        )
        .await
        .ok_or("participant vanished")?;
    assert_eq!(updated.channel, "rust");
    assert!(changed);

    registry.deregister("check-1").await;
    assert!(registry.all().await.is_empty());

    info!("✓ Registry check passed");
    Ok(())
}

async fn check_fanout_filtering() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Checking fan-out filtering...");

    let registry = Arc::new(ParticipantRegistry::new());
    let router = FanoutRouter::new(Arc::clone(&registry), MatchMode::ChannelOnly);

    let (tx_in, mut rx_in) = mpsc::unbounded_channel();
    let (tx_out, mut rx_out) = mpsc::unbounded_channel();
    registry.register("in-channel", tx_in).await;
    registry.register("other-channel", tx_out).await;
    registry
        .update(
            "in-channel",
            &SettingsUpdate {
                channel: Some("rust".to_string()),
                ..Default::default()
            },
        )
        .await;
    registry
        .update(
            "other-channel",
            &SettingsUpdate {
                channel: Some("go".to_string()),
                ..Default::default()
            },
        )
        .await;

    let post = Post {
        id: generate_post_id(),
        session_id: "check".to_string(),
        display_name: "Anonymous".to_string(),
        message: "hello".to_string(),
        image: None,
        channel: "rust".to_string(),
        latitude: 0.0,
        longitude: 0.0,
        timestamp: current_timestamp(),
    };
    router.broadcast_new_post(&post).await;

    assert!(matches!(
        rx_in.try_recv(),
        Ok(ConnectionCommand::SendNewPost(_))
    ));
    assert!(rx_out.try_recv().is_err());

    info!("✓ Fan-out check passed");
    Ok(())
}

async fn check_moderation_threshold() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Checking moderation threshold...");

    let registry = Arc::new(ParticipantRegistry::new());
    let router = Arc::new(FanoutRouter::new(
        Arc::clone(&registry),
        MatchMode::ChannelOnly,
    ));
    let store = Arc::new(MemoryStore::new());
    let trigger = ModerationTrigger::new(
        Arc::clone(&store) as Arc<dyn PostStore>,
        router,
        DEFAULT_DOWNVOTE_THRESHOLD,
    );

    let post = Post {
        id: generate_post_id(),
        session_id: "check".to_string(),
        display_name: "Anonymous".to_string(),
        message: "unpopular".to_string(),
        image: None,
        channel: String::new(),
        latitude: 0.0,
        longitude: 0.0,
        timestamp: current_timestamp(),
    };
    store.create_post(&post).await?;

    for voter in ["v1", "v2", "v3"] {
        store.add_vote(&post.id, voter, VoteType::Down).await?;
        trigger.handle_downvote(&post.id).await?;
    }

    assert_eq!(store.post_count().await, 0);

    info!("✓ Moderation check passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_check_runs_clean() {
        run_basic_check().await.unwrap();
    }
}
