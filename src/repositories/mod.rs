//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations. Every query is scoped
//! by owner where the table has one.

pub mod audit_log;
pub mod call;
pub mod integration;
pub mod link;
pub mod oauth_state;
pub mod video_cache;
pub mod webhook_status;

pub use audit_log::AuditLogRepository;
pub use call::{CallRepository, NewCall};
pub use integration::{IntegrationRepository, IntegrationTokens, NewIntegration};
pub use link::LinkRepository;
pub use oauth_state::OAuthStateRepository;
pub use video_cache::VideoCacheRepository;
pub use webhook_status::WebhookStatusRepository;
