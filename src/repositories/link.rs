//! Link repository
//!
//! Lookups are always scoped by owner so a guessed short code never resolves across users.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::Utc;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::models::link::{self, Entity as Link};

#[derive(Clone)]
pub struct LinkRepository {
    db: Arc<DatabaseConnection>,
}

impl LinkRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Finds the link with `short_code` only if `user_id` owns it.
    pub async fn find_owned(&self, short_code: &str, user_id: Uuid) -> Result<Option<link::Model>> {
        Ok(Link::find()
            .filter(link::Column::ShortCode.eq(short_code))
            .filter(link::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?)
    }

    pub async fn create(
        &self,
        user_id: Uuid,
        short_code: &str,
        destination_url: &str,
    ) -> Result<link::Model> {
        let id = Uuid::new_v4();
        let active = link::ActiveModel {
            id: Set(id),
            user_id: Set(user_id),
            short_code: Set(short_code.to_string()),
            destination_url: Set(destination_url.to_string()),
            created_at: Set(Utc::now().into()),
        };

        Link::insert(active).exec_without_returning(&*self.db).await?;

        Link::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| anyhow!("link not persisted"))
    }
}
