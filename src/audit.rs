//! Audit-log and admin-notification emitter.
//!
//! Records are built here and appended through the caller's unit of work,
//! so they commit or roll back together with the state change they describe.

use crate::auth::{authorize, Actor, Capability};
use crate::errors::AppError;
use crate::models::{AdminNotification, AuditLogEntry, AuditLogQuery};
use crate::repository::{Repository, UnitOfWork};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Audit `module` values.
pub mod modules {
    pub const KYC: &str = "organizer_kyc";
    pub const DOCUMENTS: &str = "organizer_documents";
    pub const VENDOR_AGREEMENT: &str = "vendor_agreement";
}

/// Audit `action` values.
pub mod actions {
    pub const KYC_STATUS_CHANGED: &str = "kyc_status_changed";
    pub const DOCUMENT_STATUS_CHANGED: &str = "document_status_changed";
    pub const AGREEMENT_STATUS_CHANGED: &str = "vendor_agreement_status_changed";
}

/// Notification `kind` values.
pub mod kinds {
    pub const VERIFICATION_REQUESTED: &str = "verification_requested";
}

/// Storage keeps microseconds; truncate so checksums survive a round trip.
fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

impl AuditLogEntry {
    /// Builds a sealed entry with a fresh id and the current timestamp.
    pub fn new(
        actor_id: impl Into<String>,
        action: impl Into<String>,
        module: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        let mut entry = Self {
            id: Uuid::new_v4().to_string(),
            actor_id: actor_id.into(),
            action: action.into(),
            module: module.into(),
            details,
            timestamp: now_micros(),
            checksum: String::new(),
        };
        entry.checksum = entry.compute_checksum();
        entry
    }

    fn compute_checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.id.as_str(),
            self.actor_id.as_str(),
            self.action.as_str(),
            self.module.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(self.details.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(
            self.timestamp
                .to_rfc3339_opts(SecondsFormat::Micros, true)
                .as_bytes(),
        );
        hex::encode(hasher.finalize())
    }

    /// True if no field was altered after the entry was sealed.
    pub fn is_intact(&self) -> bool {
        self.compute_checksum() == self.checksum
    }
}

impl AdminNotification {
    pub fn new(
        organizer_id: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            organizer_id: organizer_id.into(),
            kind: kind.into(),
            message: message.into(),
            timestamp: now_micros(),
        }
    }
}

/// Appends one audit entry inside `uow`.
pub async fn record(
    uow: &mut dyn UnitOfWork,
    actor: &Actor,
    action: &str,
    module: &str,
    details: serde_json::Value,
) -> Result<AuditLogEntry, AppError> {
    let entry = AuditLogEntry::new(&actor.id, action, module, details);
    uow.append_audit(&entry).await?;
    tracing::debug!(
        "Audit entry {} staged: {} {} by {}",
        entry.id,
        module,
        action,
        actor.id
    );
    Ok(entry)
}

/// Appends one admin notification inside `uow`.
pub async fn notify_admins(
    uow: &mut dyn UnitOfWork,
    organizer_id: &str,
    kind: &str,
    message: String,
) -> Result<AdminNotification, AppError> {
    let notification = AdminNotification::new(organizer_id, kind, message);
    uow.append_notification(&notification).await?;
    Ok(notification)
}

/// Admin-only audit listing.
pub async fn list_audit_logs(
    repo: &dyn Repository,
    actor: &Actor,
    query: &AuditLogQuery,
) -> Result<Vec<AuditLogEntry>, AppError> {
    authorize(actor, Capability::ViewAuditLog)?;
    repo.list_audit_logs(query).await
}

/// Admin-only notification listing.
pub async fn list_notifications(
    repo: &dyn Repository,
    actor: &Actor,
    limit: u32,
) -> Result<Vec<AdminNotification>, AppError> {
    authorize(actor, Capability::ViewNotifications)?;
    repo.list_notifications(limit).await
}
