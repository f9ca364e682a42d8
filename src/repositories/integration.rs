//! Integration repository
//!
//! The only writer of integration rows. Tokens are sealed with [`crate::crypto`] on the
//! way in and opened on the way out; callers never see ciphertext.

use std::fmt;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::crypto::{CryptoKey, decrypt_token, encrypt_token};
use crate::models::integration::{self, Entity as Integration};
use crate::providers::Provider;

/// Everything the handshake learned, committed in one upsert.
pub struct NewIntegration {
    pub user_id: Uuid,
    pub provider: Provider,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub provider_identity: Option<JsonValue>,
    pub external_user_id: Option<String>,
    pub external_org_id: Option<String>,
    pub webhook_id: Option<String>,
}

/// Plaintext tokens of one integration.
#[derive(Clone)]
pub struct IntegrationTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl fmt::Debug for IntegrationTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrationTokens")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Repository for integration database operations
#[derive(Debug, Clone)]
pub struct IntegrationRepository {
    db: Arc<DatabaseConnection>,
    crypto_key: CryptoKey,
}

fn now_tz() -> DateTimeWithTimeZone {
    Utc::now().into()
}

impl IntegrationRepository {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    fn scope(user_id: Uuid, provider: Provider) -> Condition {
        Condition::all()
            .add(integration::Column::UserId.eq(user_id))
            .add(integration::Column::Provider.eq(provider.as_str()))
    }

    /// Finds the row for `(user_id, provider)` regardless of connection status.
    pub async fn find(&self, user_id: Uuid, provider: Provider) -> Result<Option<integration::Model>> {
        Ok(Integration::find()
            .filter(Self::scope(user_id, provider))
            .one(&*self.db)
            .await?)
    }

    /// Finds the row only when it is currently connected.
    pub async fn find_connected(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> Result<Option<integration::Model>> {
        Ok(Integration::find()
            .filter(Self::scope(user_id, provider))
            .filter(integration::Column::IsConnected.eq(true))
            .one(&*self.db)
            .await?)
    }

    /// Resolves a provider-side user id to the connected integration that owns it.
    pub async fn find_connected_by_external_user(
        &self,
        provider: Provider,
        external_user_id: &str,
    ) -> Result<Option<integration::Model>> {
        Ok(Integration::find()
            .filter(integration::Column::Provider.eq(provider.as_str()))
            .filter(integration::Column::ExternalUserId.eq(external_user_id))
            .filter(integration::Column::IsConnected.eq(true))
            .order_by_desc(integration::Column::UpdatedAt)
            .one(&*self.db)
            .await?)
    }

    /// Lists a user's integrations ordered by provider.
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<integration::Model>> {
        Ok(Integration::find()
            .filter(integration::Column::UserId.eq(user_id))
            .order_by_asc(integration::Column::Provider)
            .all(&*self.db)
            .await?)
    }

    /// Connected integrations with a refresh token whose access token expires at or before
    /// `threshold`.
    pub async fn due_for_refresh(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<integration::Model>> {
        let threshold: DateTimeWithTimeZone = threshold.into();
        Ok(Integration::find()
            .filter(integration::Column::IsConnected.eq(true))
            .filter(integration::Column::RefreshTokenCiphertext.is_not_null())
            .filter(integration::Column::TokenExpiresAt.is_not_null())
            .filter(integration::Column::TokenExpiresAt.lte(threshold))
            .order_by_asc(integration::Column::TokenExpiresAt)
            .all(&*self.db)
            .await?)
    }

    /// Opens the sealed tokens of a row.
    pub fn decrypt_tokens(&self, model: &integration::Model) -> Result<IntegrationTokens> {
        let provider: Provider = model
            .provider
            .parse()
            .map_err(|e| anyhow!("integration {} has {}", model.id, e))?;

        let open = |ciphertext: &Option<Vec<u8>>| -> Result<Option<String>> {
            ciphertext
                .as_deref()
                .map(|bytes| decrypt_token(&self.crypto_key, model.user_id, provider, bytes))
                .transpose()
                .map_err(|e| {
                    tracing::error!(
                        user_id = %model.user_id,
                        provider = %model.provider,
                        "Token decryption failed"
                    );
                    anyhow!("Token decryption failed: {}", e)
                })
        };

        Ok(IntegrationTokens {
            access_token: open(&model.access_token_ciphertext)?,
            refresh_token: open(&model.refresh_token_ciphertext)?,
        })
    }

    fn seal(&self, user_id: Uuid, provider: Provider, token: &str) -> Result<Vec<u8>> {
        encrypt_token(&self.crypto_key, user_id, provider, token)
            .map_err(|e| anyhow!("Token encryption failed: {}", e))
    }

    /// Inserts or overwrites the `(user_id, provider)` row and marks it connected.
    ///
    /// A re-auth that returns no refresh token keeps the stored one.
    pub async fn upsert_connected(&self, new: NewIntegration) -> Result<integration::Model> {
        let now = now_tz();
        let access = self.seal(new.user_id, new.provider, &new.access_token)?;
        let refresh = new
            .refresh_token
            .as_deref()
            .map(|token| self.seal(new.user_id, new.provider, token))
            .transpose()?;

        let mut update_columns = vec![
            integration::Column::AccessTokenCiphertext,
            integration::Column::TokenExpiresAt,
            integration::Column::IsConnected,
            integration::Column::ProviderIdentity,
            integration::Column::ExternalUserId,
            integration::Column::ExternalOrgId,
            integration::Column::WebhookId,
            integration::Column::UpdatedAt,
        ];
        if refresh.is_some() {
            update_columns.push(integration::Column::RefreshTokenCiphertext);
        }

        let active = integration::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(new.user_id),
            provider: Set(new.provider.as_str().to_string()),
            access_token_ciphertext: Set(Some(access)),
            refresh_token_ciphertext: Set(refresh),
            token_expires_at: Set(new.token_expires_at.map(Into::into)),
            is_connected: Set(true),
            provider_identity: Set(new.provider_identity),
            external_user_id: Set(new.external_user_id),
            external_org_id: Set(new.external_org_id),
            webhook_id: Set(new.webhook_id),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Integration::insert(active)
            .on_conflict(
                OnConflict::columns([integration::Column::UserId, integration::Column::Provider])
                    .update_columns(update_columns)
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        self.find(new.user_id, new.provider)
            .await?
            .ok_or_else(|| anyhow!("integration not persisted"))
    }

    /// Stores a refreshed grant. `refresh_token = None` keeps the current one.
    pub async fn update_tokens(
        &self,
        user_id: Uuid,
        provider: Provider,
        access_token: &str,
        refresh_token: Option<&str>,
        token_expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut patch = integration::ActiveModel {
            access_token_ciphertext: Set(Some(self.seal(user_id, provider, access_token)?)),
            token_expires_at: Set(token_expires_at.map(Into::into)),
            updated_at: Set(now_tz()),
            ..Default::default()
        };
        if let Some(refresh_token) = refresh_token {
            patch.refresh_token_ciphertext = Set(Some(self.seal(user_id, provider, refresh_token)?));
        }

        Integration::update_many()
            .set(patch)
            .filter(Self::scope(user_id, provider))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn set_webhook_id(
        &self,
        user_id: Uuid,
        provider: Provider,
        webhook_id: Option<String>,
    ) -> Result<()> {
        Integration::update_many()
            .set(integration::ActiveModel {
                webhook_id: Set(webhook_id),
                updated_at: Set(now_tz()),
                ..Default::default()
            })
            .filter(Self::scope(user_id, provider))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// Flags the row disconnected and clears every credential. Returns whether a row existed.
    pub async fn mark_disconnected(&self, user_id: Uuid, provider: Provider) -> Result<bool> {
        let result = Integration::update_many()
            .set(integration::ActiveModel {
                access_token_ciphertext: Set(None),
                refresh_token_ciphertext: Set(None),
                token_expires_at: Set(None),
                is_connected: Set(false),
                webhook_id: Set(None),
                updated_at: Set(now_tz()),
                ..Default::default()
            })
            .filter(Self::scope(user_id, provider))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Removes the row entirely (force-disconnect only).
    pub async fn hard_delete(&self, user_id: Uuid, provider: Provider) -> Result<u64> {
        let result = Integration::delete_many()
            .filter(Self::scope(user_id, provider))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
