//! # OAuth State Repository
//!
//! Database operations for single-use OAuth handshake state.

use chrono::{Duration, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::oauth_state::{self, ActiveModel, Entity, Model};
use crate::providers::Provider;

/// Repository for OAuth state database operations
#[derive(Clone)]
pub struct OAuthStateRepository {
    db: Arc<DatabaseConnection>,
}

impl OAuthStateRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Persist a new state that expires after `ttl_minutes`.
    pub async fn create(
        &self,
        user_id: Uuid,
        provider: Provider,
        state: &str,
        code_challenge: Option<String>,
        ttl_minutes: i64,
    ) -> Result<Model, sea_orm::DbErr> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let model = Model {
            id: Uuid::new_v4(),
            user_id,
            provider: provider.as_str().to_string(),
            state: state.to_string(),
            code_challenge,
            expires_at: now + Duration::minutes(ttl_minutes),
            created_at: now,
        };

        let active = ActiveModel {
            id: Set(model.id),
            user_id: Set(model.user_id),
            provider: Set(model.provider.clone()),
            state: Set(model.state.clone()),
            code_challenge: Set(model.code_challenge.clone()),
            expires_at: Set(model.expires_at),
            created_at: Set(model.created_at),
        };

        Entity::insert(active)
            .exec_without_returning(&*self.db)
            .await?;

        Ok(model)
    }

    /// Find and delete an unexpired state. Returns `None` when it is unknown, expired, or
    /// was consumed concurrently.
    pub async fn consume(
        &self,
        provider: Provider,
        state: &str,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let Some(found) = Entity::find()
            .filter(oauth_state::Column::Provider.eq(provider.as_str()))
            .filter(oauth_state::Column::State.eq(state))
            .filter(oauth_state::Column::ExpiresAt.gt(now))
            .one(&*self.db)
            .await?
        else {
            return Ok(None);
        };

        let deleted = Entity::delete_by_id(found.id).exec(&*self.db).await?;
        if deleted.rows_affected == 0 {
            return Ok(None);
        }

        Ok(Some(found))
    }

    /// Deletes expired states, returning how many were removed.
    pub async fn purge_expired(&self) -> Result<u64, sea_orm::DbErr> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let result = Entity::delete_many()
            .filter(oauth_state::Column::ExpiresAt.lte(now))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
