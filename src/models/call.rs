//! Attributed call entity model
//!
//! A booking that arrived by webhook and was traced back to one of the owner's links.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "calls")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,

    pub link_id: Uuid,

    pub short_code: String,

    /// Provider event identifier (Calendly invitee URI); unique per user
    pub external_event_id: String,

    pub contact_email: Option<String>,

    pub contact_name: Option<String>,

    /// When the booking happened at the provider
    pub occurred_at: DateTimeWithTimeZone,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
