//! Persistence seams.
//!
//! [`Repository`] serves plain reads. Every mutation goes through a
//! [`UnitOfWork`]: rows are locked by `lock_*`, writes are buffered or
//! transactional, and nothing becomes visible until [`UnitOfWork::commit`].
//! Dropping a unit of work without committing discards all of its writes.
//!
//! Lock order is organizer before lead. Implementations must reject a
//! second unlock record for the same lead with `AppError::AlreadyUnlocked`.

use crate::errors::AppError;
use crate::models::{
    AdminNotification, AgreementStatus, AuditLogEntry, AuditLogQuery, KycStatus, Lead,
    LeadPurchase, LeadUnlock, Organizer, OrganizerDocument, Trip,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Default page size for audit-log listings.
pub const DEFAULT_AUDIT_LIMIT: u32 = 50;
/// Upper bound for audit-log page size.
pub const MAX_AUDIT_LIMIT: u32 = 500;

#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_organizer(&self, id: &str) -> Result<Option<Organizer>, AppError>;

    async fn find_lead(&self, id: &str) -> Result<Option<Lead>, AppError>;

    async fn find_trip(&self, id: &str) -> Result<Option<Trip>, AppError>;

    /// Leads on any trip owned by the organizer, oldest first.
    async fn list_leads_for_organizer(&self, organizer_id: &str) -> Result<Vec<Lead>, AppError>;

    async fn list_organizer_ids(&self) -> Result<Vec<String>, AppError>;

    /// Newest first, filtered and paginated by `query`.
    async fn list_audit_logs(&self, query: &AuditLogQuery)
        -> Result<Vec<AuditLogEntry>, AppError>;

    /// Newest first.
    async fn list_notifications(&self, limit: u32) -> Result<Vec<AdminNotification>, AppError>;

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError>;
}

#[async_trait]
pub trait UnitOfWork: Send {
    /// Loads the organizer and holds its row lock until commit or drop.
    async fn lock_organizer(&mut self, id: &str) -> Result<Option<Organizer>, AppError>;

    /// Loads the lead and holds its row lock until commit or drop.
    async fn lock_lead(&mut self, id: &str) -> Result<Option<Lead>, AppError>;

    async fn find_trip(&mut self, id: &str) -> Result<Option<Trip>, AppError>;

    /// Fails with `Conflict` if the id is taken.
    async fn insert_organizer(&mut self, organizer: &Organizer) -> Result<(), AppError>;

    async fn update_kyc_status(
        &mut self,
        organizer_id: &str,
        status: KycStatus,
    ) -> Result<(), AppError>;

    /// Replaces the document with the same `doc_type`.
    async fn update_document(
        &mut self,
        organizer_id: &str,
        document: &OrganizerDocument,
    ) -> Result<(), AppError>;

    async fn update_vendor_agreement(
        &mut self,
        organizer_id: &str,
        status: AgreementStatus,
        file_ref: Option<&str>,
    ) -> Result<(), AppError>;

    async fn set_available_credits(
        &mut self,
        organizer_id: &str,
        available: u32,
    ) -> Result<(), AppError>;

    async fn append_purchase(
        &mut self,
        organizer_id: &str,
        purchase: &LeadPurchase,
    ) -> Result<(), AppError>;

    /// Fails with `AlreadyUnlocked` if the lead already has an unlock record.
    async fn append_unlock(&mut self, organizer_id: &str, unlock: &LeadUnlock)
        -> Result<(), AppError>;

    async fn mark_lead_unlocked(
        &mut self,
        lead_id: &str,
        organizer_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn insert_trip(&mut self, trip: &Trip) -> Result<(), AppError>;

    async fn insert_lead(&mut self, lead: &Lead) -> Result<(), AppError>;

    async fn append_audit(&mut self, entry: &AuditLogEntry) -> Result<(), AppError>;

    async fn append_notification(
        &mut self,
        notification: &AdminNotification,
    ) -> Result<(), AppError>;

    /// Applies every write atomically, or none of them.
    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}

/// Locks the organizer row, failing with `NotFound` if it does not exist.
pub async fn lock_existing_organizer(
    uow: &mut dyn UnitOfWork,
    id: &str,
) -> Result<Organizer, AppError> {
    uow.lock_organizer(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Organizer {} not found", id)))
}

/// Clamps a requested page size into `1..=MAX_AUDIT_LIMIT`.
pub fn effective_audit_limit(requested: Option<u32>) -> u32 {
    requested
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .clamp(1, MAX_AUDIT_LIMIT)
}
