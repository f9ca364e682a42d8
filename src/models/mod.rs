//! # Data Models
//!
//! SeaORM entities for integrations, webhook health, OAuth handshakes, links,
//! attributed calls, the video cache and the integration audit trail.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod audit_log;
pub mod call;
pub mod integration;
pub mod link;
pub mod oauth_state;
pub mod webhook_status;
pub mod youtube_video;

pub use audit_log::Entity as AuditLog;
pub use call::Entity as Call;
pub use integration::Entity as Integration;
pub use link::Entity as Link;
pub use oauth_state::Entity as OAuthState;
pub use webhook_status::Entity as WebhookStatus;
pub use youtube_video::Entity as YoutubeVideo;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "linktrail".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
