//! Membership-filtering rule for post fan-out
//!
//! Decides whether a participant should see a given post. Two modes exist:
//! channel-only equality, and channel equality combined with a geofence
//! radius check. Geofencing is config-gated; channel-only is the default.

use crate::protocol::messages::Post;
use crate::registry::Participant;

/// Earth radius in miles for great-circle distance
pub const EARTH_RADIUS_MILES: f64 = 3959.0;

/// Filtering mode applied by the fan-out router and snapshot loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Posts are visible to everyone in the same normalized channel
    #[default]
    ChannelOnly,
    /// Channel equality plus a within-radius distance check; participants
    /// without a location or radius never match, even in the public channel
    Geofenced,
}

/// Canonical channel normalization, applied at every write boundary and
/// inside the matching predicate. Empty string is the default/public channel;
/// `""`, `" "` and a missing value all collapse to the same identity.
pub fn normalize_channel(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Decide whether `participant` should see `post`
pub fn matches(participant: &Participant, post: &Post, mode: MatchMode) -> bool {
    if normalize_channel(&participant.channel) != normalize_channel(&post.channel) {
        return false;
    }

    match mode {
        MatchMode::ChannelOnly => true,
        MatchMode::Geofenced => {
            let (location, radius) = match (participant.location(), participant.radius_miles) {
                (Some(loc), Some(radius)) => (loc, radius),
                _ => return false,
            };

            let distance = haversine_miles(
                location.latitude,
                location.longitude,
                post.latitude,
                post.longitude,
            );
            distance <= radius
        }
    }
}

/// Great-circle distance between two coordinates, in miles
pub fn haversine_miles(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_MILES * a.sqrt().asin()
}
