//! Audit log repository

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::audit_log::{self, Entity as AuditLog};

#[derive(Clone)]
pub struct AuditLogRepository {
    db: Arc<DatabaseConnection>,
}

impl AuditLogRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn insert(
        &self,
        user_id: Uuid,
        provider: &str,
        action: &str,
        detail: Option<JsonValue>,
    ) -> Result<()> {
        let active = audit_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            provider: Set(provider.to_string()),
            action: Set(action.to_string()),
            detail: Set(detail),
            created_at: Set(Utc::now().into()),
        };
        AuditLog::insert(active)
            .exec_without_returning(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<audit_log::Model>> {
        Ok(AuditLog::find()
            .filter(audit_log::Column::UserId.eq(user_id))
            .order_by_asc(audit_log::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}
