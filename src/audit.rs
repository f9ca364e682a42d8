//! Fire-and-forget audit trail for integration lifecycle events.
//!
//! [`AuditLogger::record`] never blocks and never fails its caller: the insert runs on a
//! spawned task and a failure is only logged.

use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::providers::Provider;
use crate::repositories::AuditLogRepository;

/// Audited lifecycle actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Connect,
    Disconnect,
    RefreshFailed,
    ForceDisconnect,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Connect => "connect",
            AuditAction::Disconnect => "disconnect",
            AuditAction::RefreshFailed => "refresh_failed",
            AuditAction::ForceDisconnect => "force_disconnect",
        }
    }
}

#[derive(Clone)]
pub struct AuditLogger {
    repo: AuditLogRepository,
}

impl AuditLogger {
    pub fn new(repo: AuditLogRepository) -> Self {
        Self { repo }
    }

    /// Schedules an audit insert. The returned handle exists for tests; callers drop it.
    pub fn record(
        &self,
        user_id: Uuid,
        provider: Provider,
        action: AuditAction,
        detail: Option<JsonValue>,
    ) -> JoinHandle<()> {
        let repo = self.repo.clone();
        tokio::spawn(async move {
            if let Err(error) = repo
                .insert(user_id, provider.as_str(), action.as_str(), detail)
                .await
            {
                tracing::warn!(
                    %user_id,
                    %provider,
                    action = action.as_str(),
                    error = %error,
                    "Failed to write audit log entry"
                );
            }
        })
    }
}
