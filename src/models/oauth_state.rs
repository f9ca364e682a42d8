//! # OAuth State Model
//!
//! Single-use anti-forgery state issued when a handshake starts.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

use uuid::Uuid;

/// OAuth State entity for storing OAuth flow state tokens
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "oauth_states")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// User that started the handshake
    pub user_id: Uuid,

    /// Provider slug
    pub provider: String,

    /// State token generated for CSRF protection
    pub state: String,

    /// PKCE S256 challenge; the verifier itself never reaches the server's storage
    pub code_challenge: Option<String>,

    pub expires_at: DateTimeWithTimeZone,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
