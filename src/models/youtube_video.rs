//! YouTube video cache entity model
//!
//! Basic fields are written by listing; detailed fields are filled lazily by the
//! detail endpoint. A row is complete only when every detailed field is set.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "youtube_videos")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,

    pub video_id: String,

    pub title: String,

    pub description: Option<String>,

    pub thumbnail_url: Option<String>,

    pub published_at: Option<DateTimeWithTimeZone>,

    pub view_count: Option<i64>,

    pub like_count: Option<i64>,

    pub comment_count: Option<i64>,

    /// ISO 8601 duration as reported by YouTube
    pub duration: Option<String>,

    pub privacy_status: Option<String>,

    pub fetched_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Whether every detailed field has been populated.
    pub fn is_complete(&self) -> bool {
        self.view_count.is_some()
            && self.like_count.is_some()
            && self.comment_count.is_some()
            && self.duration.is_some()
            && self.privacy_status.is_some()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
