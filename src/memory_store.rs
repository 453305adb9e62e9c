//! In-process store used when no database is configured, and by the tests.
//!
//! Row locks are per-key async mutexes. A unit of work stages its writes in
//! private copies of the rows it touched and applies them under one write
//! lock on commit, so concurrent readers never observe half a transaction.

use crate::errors::AppError;
use crate::models::{
    AdminNotification, AgreementStatus, AuditLogEntry, AuditLogQuery, KycStatus, Lead,
    LeadPurchase, LeadUnlock, Organizer, OrganizerDocument, Trip,
};
use crate::repository::{effective_audit_limit, Repository, UnitOfWork};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Default)]
struct MemoryState {
    organizers: HashMap<String, Organizer>,
    trips: HashMap<String, Trip>,
    leads: HashMap<String, Lead>,
    /// Uniqueness index over unlock records.
    unlocked_leads: HashSet<String>,
    audit_log: Vec<AuditLogEntry>,
    notifications: Vec<AdminNotification>,
}

type LockMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Registry of per-key async mutexes.
#[derive(Debug, Default)]
struct KeyedLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl KeyedLocks {
    async fn acquire(&self, key: &str) -> Result<KeyGuard, AppError> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| AppError::StorageError("lock registry poisoned".to_string()))?;
            locks.entry(key.to_string()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        Ok(KeyGuard {
            key: key.to_string(),
            guard: Some(guard),
            registry: self.locks.clone(),
        })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }
}

/// A held row lock. Releasing it drops the registry entry when no other
/// caller holds or waits on the same key.
#[derive(Debug)]
struct KeyGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    registry: Arc<Mutex<LockMap>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        if let Ok(mut locks) = self.registry.lock() {
            // Waiters hold a clone of the Arc, so a count of one means idle
            if locks
                .get(&self.key)
                .is_some_and(|lock| Arc::strong_count(lock) == 1)
            {
                locks.remove(&self.key);
            }
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: RwLock<MemoryState>,
    organizer_locks: KeyedLocks,
    lead_locks: KeyedLocks,
    fail_next_commit: AtomicBool,
}

impl Inner {
    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryState>, AppError> {
        self.state
            .read()
            .map_err(|_| AppError::StorageError("memory store poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryState>, AppError> {
        self.state
            .write()
            .map_err(|_| AppError::StorageError("memory store poisoned".to_string()))
    }
}

/// Cheaply cloneable handle to a shared in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next commit fail with `StorageError` without applying anything.
    pub fn fail_next_commit(&self) {
        self.inner.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Repository for MemoryStore {
    async fn find_organizer(&self, id: &str) -> Result<Option<Organizer>, AppError> {
        Ok(self.inner.read()?.organizers.get(id).cloned())
    }

    async fn find_lead(&self, id: &str) -> Result<Option<Lead>, AppError> {
        Ok(self.inner.read()?.leads.get(id).cloned())
    }

    async fn find_trip(&self, id: &str) -> Result<Option<Trip>, AppError> {
        Ok(self.inner.read()?.trips.get(id).cloned())
    }

    async fn list_leads_for_organizer(&self, organizer_id: &str) -> Result<Vec<Lead>, AppError> {
        let state = self.inner.read()?;
        let mut leads: Vec<Lead> = state
            .leads
            .values()
            .filter(|lead| {
                state
                    .trips
                    .get(&lead.trip_id)
                    .is_some_and(|trip| trip.organizer_id == organizer_id)
            })
            .cloned()
            .collect();
        leads.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(leads)
    }

    async fn list_organizer_ids(&self) -> Result<Vec<String>, AppError> {
        let mut ids: Vec<String> = self.inner.read()?.organizers.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn list_audit_logs(
        &self,
        query: &AuditLogQuery,
    ) -> Result<Vec<AuditLogEntry>, AppError> {
        let state = self.inner.read()?;
        let limit = effective_audit_limit(query.limit) as usize;
        let offset = query.offset.unwrap_or(0) as usize;

        Ok(state
            .audit_log
            .iter()
            .rev()
            .filter(|e| query.actor_id.as_ref().map_or(true, |a| &e.actor_id == a))
            .filter(|e| query.module.as_ref().map_or(true, |m| &e.module == m))
            .filter(|e| query.action.as_ref().map_or(true, |a| &e.action == a))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_notifications(&self, limit: u32) -> Result<Vec<AdminNotification>, AppError> {
        let state = self.inner.read()?;
        Ok(state
            .notifications
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError> {
        Ok(Box::new(MemoryUnitOfWork {
            inner: self.inner.clone(),
            guards: Vec::new(),
            locked_organizers: HashSet::new(),
            locked_leads: HashSet::new(),
            organizers: HashMap::new(),
            new_organizers: HashSet::new(),
            leads: HashMap::new(),
            new_leads: HashSet::new(),
            trips: Vec::new(),
            unlocked_leads: HashSet::new(),
            audit_log: Vec::new(),
            notifications: Vec::new(),
        }))
    }
}

struct MemoryUnitOfWork {
    inner: Arc<Inner>,
    /// Row locks held until this unit of work is dropped.
    guards: Vec<KeyGuard>,
    locked_organizers: HashSet<String>,
    locked_leads: HashSet<String>,
    organizers: HashMap<String, Organizer>,
    new_organizers: HashSet<String>,
    leads: HashMap<String, Lead>,
    new_leads: HashSet<String>,
    trips: Vec<Trip>,
    unlocked_leads: HashSet<String>,
    audit_log: Vec<AuditLogEntry>,
    notifications: Vec<AdminNotification>,
}

impl MemoryUnitOfWork {
    async fn ensure_organizer_lock(&mut self, id: &str) -> Result<(), AppError> {
        if self.locked_organizers.contains(id) {
            return Ok(());
        }
        let guard = self.inner.organizer_locks.acquire(id).await?;
        self.guards.push(guard);
        self.locked_organizers.insert(id.to_string());
        Ok(())
    }

    async fn ensure_lead_lock(&mut self, id: &str) -> Result<(), AppError> {
        if self.locked_leads.contains(id) {
            return Ok(());
        }
        let guard = self.inner.lead_locks.acquire(id).await?;
        self.guards.push(guard);
        self.locked_leads.insert(id.to_string());
        Ok(())
    }

    /// Locked, staged copy of an organizer for modification.
    async fn staged_organizer(&mut self, id: &str) -> Result<&mut Organizer, AppError> {
        self.ensure_organizer_lock(id).await?;
        if !self.organizers.contains_key(id) {
            let current = self
                .inner
                .read()?
                .organizers
                .get(id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("Organizer {} not found", id)))?;
            self.organizers.insert(id.to_string(), current);
        }
        self.organizers
            .get_mut(id)
            .ok_or_else(|| AppError::InternalError(format!("organizer {} not staged", id)))
    }

    async fn staged_lead(&mut self, id: &str) -> Result<&mut Lead, AppError> {
        self.ensure_lead_lock(id).await?;
        if !self.leads.contains_key(id) {
            let current = self
                .inner
                .read()?
                .leads
                .get(id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", id)))?;
            self.leads.insert(id.to_string(), current);
        }
        self.leads
            .get_mut(id)
            .ok_or_else(|| AppError::InternalError(format!("lead {} not staged", id)))
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_organizer(&mut self, id: &str) -> Result<Option<Organizer>, AppError> {
        self.ensure_organizer_lock(id).await?;
        if let Some(staged) = self.organizers.get(id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.inner.read()?.organizers.get(id).cloned())
    }

    async fn lock_lead(&mut self, id: &str) -> Result<Option<Lead>, AppError> {
        self.ensure_lead_lock(id).await?;
        if let Some(staged) = self.leads.get(id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.inner.read()?.leads.get(id).cloned())
    }

    async fn find_trip(&mut self, id: &str) -> Result<Option<Trip>, AppError> {
        if let Some(staged) = self.trips.iter().find(|t| t.id == id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.inner.read()?.trips.get(id).cloned())
    }

    async fn insert_organizer(&mut self, organizer: &Organizer) -> Result<(), AppError> {
        self.ensure_organizer_lock(&organizer.id).await?;
        let exists = self.organizers.contains_key(&organizer.id)
            || self.inner.read()?.organizers.contains_key(&organizer.id);
        if exists {
            return Err(AppError::Conflict(format!(
                "Organizer {} already exists",
                organizer.id
            )));
        }
        self.organizers
            .insert(organizer.id.clone(), organizer.clone());
        self.new_organizers.insert(organizer.id.clone());
        Ok(())
    }

    async fn update_kyc_status(
        &mut self,
        organizer_id: &str,
        status: KycStatus,
    ) -> Result<(), AppError> {
        let organizer = self.staged_organizer(organizer_id).await?;
        organizer.kyc_status = status;
        organizer.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn update_document(
        &mut self,
        organizer_id: &str,
        document: &OrganizerDocument,
    ) -> Result<(), AppError> {
        let organizer = self.staged_organizer(organizer_id).await?;
        let slot = organizer.document_mut(&document.doc_type).ok_or_else(|| {
            AppError::DocumentNotFound(format!(
                "Organizer {} has no document '{}'",
                organizer_id, document.doc_type
            ))
        })?;
        *slot = document.clone();
        organizer.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn update_vendor_agreement(
        &mut self,
        organizer_id: &str,
        status: AgreementStatus,
        file_ref: Option<&str>,
    ) -> Result<(), AppError> {
        let organizer = self.staged_organizer(organizer_id).await?;
        organizer.vendor_agreement_status = status;
        if let Some(file_ref) = file_ref {
            organizer.vendor_agreement_ref = Some(file_ref.to_string());
        }
        organizer.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn set_available_credits(
        &mut self,
        organizer_id: &str,
        available: u32,
    ) -> Result<(), AppError> {
        let organizer = self.staged_organizer(organizer_id).await?;
        organizer.lead_credits.available = available;
        organizer.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn append_purchase(
        &mut self,
        organizer_id: &str,
        purchase: &LeadPurchase,
    ) -> Result<(), AppError> {
        let organizer = self.staged_organizer(organizer_id).await?;
        organizer.lead_purchase_history.push(purchase.clone());
        Ok(())
    }

    async fn append_unlock(
        &mut self,
        organizer_id: &str,
        unlock: &LeadUnlock,
    ) -> Result<(), AppError> {
        let duplicate = self.unlocked_leads.contains(&unlock.lead_id)
            || self.inner.read()?.unlocked_leads.contains(&unlock.lead_id);
        if duplicate {
            return Err(AppError::AlreadyUnlocked(format!(
                "Lead {} is already unlocked",
                unlock.lead_id
            )));
        }
        let organizer = self.staged_organizer(organizer_id).await?;
        organizer.lead_unlock_history.push(unlock.clone());
        self.unlocked_leads.insert(unlock.lead_id.clone());
        Ok(())
    }

    async fn mark_lead_unlocked(
        &mut self,
        lead_id: &str,
        organizer_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let lead = self.staged_lead(lead_id).await?;
        lead.is_unlocked = true;
        lead.unlocked_by = Some(organizer_id.to_string());
        lead.unlocked_at = Some(at);
        Ok(())
    }

    async fn insert_trip(&mut self, trip: &Trip) -> Result<(), AppError> {
        let exists = self.trips.iter().any(|t| t.id == trip.id)
            || self.inner.read()?.trips.contains_key(&trip.id);
        if exists {
            return Err(AppError::Conflict(format!("Trip {} already exists", trip.id)));
        }
        self.trips.push(trip.clone());
        Ok(())
    }

    async fn insert_lead(&mut self, lead: &Lead) -> Result<(), AppError> {
        self.ensure_lead_lock(&lead.id).await?;
        let exists =
            self.leads.contains_key(&lead.id) || self.inner.read()?.leads.contains_key(&lead.id);
        if exists {
            return Err(AppError::Conflict(format!("Lead {} already exists", lead.id)));
        }
        self.leads.insert(lead.id.clone(), lead.clone());
        self.new_leads.insert(lead.id.clone());
        Ok(())
    }

    async fn append_audit(&mut self, entry: &AuditLogEntry) -> Result<(), AppError> {
        self.audit_log.push(entry.clone());
        Ok(())
    }

    async fn append_notification(
        &mut self,
        notification: &AdminNotification,
    ) -> Result<(), AppError> {
        self.notifications.push(notification.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let this = *self;

        if this.inner.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(AppError::StorageError(
                "commit rejected by memory store".to_string(),
            ));
        }

        {
            let mut state = this.inner.write()?;

            // Re-check uniqueness under the write lock before touching anything
            if let Some(lead_id) = this
                .unlocked_leads
                .iter()
                .find(|id| state.unlocked_leads.contains(*id))
            {
                return Err(AppError::AlreadyUnlocked(format!(
                    "Lead {} is already unlocked",
                    lead_id
                )));
            }
            if let Some(id) = this
                .new_organizers
                .iter()
                .find(|id| state.organizers.contains_key(*id))
            {
                return Err(AppError::Conflict(format!("Organizer {} already exists", id)));
            }
            if let Some(id) = this.new_leads.iter().find(|id| state.leads.contains_key(*id)) {
                return Err(AppError::Conflict(format!("Lead {} already exists", id)));
            }
            if let Some(trip) = this.trips.iter().find(|t| state.trips.contains_key(&t.id)) {
                return Err(AppError::Conflict(format!("Trip {} already exists", trip.id)));
            }

            for (id, organizer) in this.organizers {
                state.organizers.insert(id, organizer);
            }
            for (id, lead) in this.leads {
                state.leads.insert(id, lead);
            }
            for trip in this.trips {
                state.trips.insert(trip.id.clone(), trip);
            }
            state.unlocked_leads.extend(this.unlocked_leads);
            state.audit_log.extend(this.audit_log);
            state.notifications.extend(this.notifications);
        }

        // Row locks are released only after the writes are visible
        drop(this.guards);
        Ok(())
    }
}
