//! Call repository
//!
//! Attributed bookings. Redelivered webhook events collapse onto the unique
//! `(user_id, external_event_id)` key.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use uuid::Uuid;

use crate::models::call::{self, Entity as Call};

/// Fields of a call about to be recorded.
#[derive(Debug, Clone)]
pub struct NewCall {
    pub user_id: Uuid,
    pub link_id: Uuid,
    pub short_code: String,
    pub external_event_id: String,
    pub contact_email: Option<String>,
    pub contact_name: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CallRepository {
    db: Arc<DatabaseConnection>,
}

impl CallRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Inserts the call unless one with the same external event id exists for the user.
    /// Returns `true` when a row was written.
    pub async fn insert_if_absent(&self, new: NewCall) -> Result<bool> {
        let active = call::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(new.user_id),
            link_id: Set(new.link_id),
            short_code: Set(new.short_code),
            external_event_id: Set(new.external_event_id),
            contact_email: Set(new.contact_email),
            contact_name: Set(new.contact_name),
            occurred_at: Set(new.occurred_at.into()),
            created_at: Set(Utc::now().into()),
        };

        let inserted = Call::insert(active)
            .on_conflict(
                OnConflict::columns([call::Column::UserId, call::Column::ExternalEventId])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        Ok(inserted > 0)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<call::Model>> {
        Ok(Call::find()
            .filter(call::Column::UserId.eq(user_id))
            .order_by_asc(call::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}
