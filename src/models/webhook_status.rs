//! Webhook status entity model
//!
//! Last known health of a provider subscription, per user. Operator visibility only.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "webhook_status")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub provider: String,

    /// Owning user; `None` for provider-wide endpoints
    pub user_id: Option<Uuid>,

    pub is_active: bool,

    pub webhook_id: Option<String>,

    /// Machine-readable reason for the last deactivation
    pub last_error: Option<String>,

    pub last_checked_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
