//! Webhook status repository
//!
//! One row per `(provider, user)`, flipped by signature checks and successful deliveries.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::models::webhook_status::{self, Entity as WebhookStatus};
use crate::providers::Provider;

#[derive(Clone)]
pub struct WebhookStatusRepository {
    db: Arc<DatabaseConnection>,
}

impl WebhookStatusRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find(
        &self,
        provider: Provider,
        user_id: Option<Uuid>,
    ) -> Result<Option<webhook_status::Model>> {
        let query = WebhookStatus::find()
            .filter(webhook_status::Column::Provider.eq(provider.as_str()));
        let query = match user_id {
            Some(user_id) => query.filter(webhook_status::Column::UserId.eq(user_id)),
            None => query.filter(webhook_status::Column::UserId.is_null()),
        };
        Ok(query.one(&*self.db).await?)
    }

    /// Marks the subscription healthy. `webhook_id = None` keeps the stored id.
    pub async fn mark_active(
        &self,
        provider: Provider,
        user_id: Option<Uuid>,
        webhook_id: Option<&str>,
    ) -> Result<()> {
        self.record(provider, user_id, true, webhook_id, None).await
    }

    /// Marks the subscription unhealthy with a machine-readable reason.
    pub async fn mark_inactive(
        &self,
        provider: Provider,
        user_id: Option<Uuid>,
        reason: &str,
    ) -> Result<()> {
        self.record(provider, user_id, false, None, Some(reason))
            .await
    }

    async fn record(
        &self,
        provider: Provider,
        user_id: Option<Uuid>,
        is_active: bool,
        webhook_id: Option<&str>,
        last_error: Option<&str>,
    ) -> Result<()> {
        let now: DateTimeWithTimeZone = Utc::now().into();

        match self.find(provider, user_id).await? {
            Some(existing) => {
                let mut active: webhook_status::ActiveModel = existing.into();
                active.is_active = Set(is_active);
                active.last_error = Set(last_error.map(str::to_string));
                active.last_checked_at = Set(now);
                if let Some(webhook_id) = webhook_id {
                    active.webhook_id = Set(Some(webhook_id.to_string()));
                }
                active.update(&*self.db).await?;
            }
            None => {
                let active = webhook_status::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    provider: Set(provider.as_str().to_string()),
                    user_id: Set(user_id),
                    is_active: Set(is_active),
                    webhook_id: Set(webhook_id.map(str::to_string)),
                    last_error: Set(last_error.map(str::to_string)),
                    last_checked_at: Set(now),
                };
                WebhookStatus::insert(active)
                    .exec_without_returning(&*self.db)
                    .await?;
            }
        }

        Ok(())
    }
}
