//! Integration entity model
//!
//! One row per `(user_id, provider)`: the OAuth credentials and provider-side
//! identifiers for a user's connection to Calendly or YouTube.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Integration entity holding encrypted tokens and provider identity
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "integrations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning end user
    pub user_id: Uuid,

    /// Provider slug (`calendly` | `youtube`)
    pub provider: String,

    /// AES-GCM sealed access token
    pub access_token_ciphertext: Option<Vec<u8>>,

    /// AES-GCM sealed refresh token
    pub refresh_token_ciphertext: Option<Vec<u8>>,

    /// Access token expiry; `None` means the provider did not say
    pub token_expires_at: Option<DateTimeWithTimeZone>,

    /// False after disconnect; the row is kept for history
    pub is_connected: bool,

    /// Provider identity descriptor (Calendly user/org, YouTube channel)
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub provider_identity: Option<JsonValue>,

    /// Provider-side user id used to route organization-level webhooks
    pub external_user_id: Option<String>,

    /// Provider-side organization id (Calendly)
    pub external_org_id: Option<String>,

    /// Opaque provider webhook subscription URI
    pub webhook_id: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
