//! Atomic exchange of one lead credit for a lead's contact details.

use crate::auth::{authorize_self, Actor, Capability};
use crate::errors::AppError;
use crate::ledger::verify_consistency;
use crate::models::{Lead, LeadUnlock, Organizer};
use crate::repository::{lock_existing_organizer, Repository};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Credits charged per unlock.
pub const UNLOCK_COST: u32 = 1;

pub struct UnlockService {
    store: Arc<dyn Repository>,
}

impl UnlockService {
    pub fn new(store: Arc<dyn Repository>) -> Self {
        Self { store }
    }

    /// Spends one credit to reveal `lead_id` to `organizer_id`.
    ///
    /// Rows are locked organizer first, then lead. Every check runs before
    /// the first write, so a rejected unlock leaves no trace.
    pub async fn unlock_lead(
        &self,
        actor: &Actor,
        organizer_id: &str,
        lead_id: &str,
    ) -> Result<(Organizer, Lead), AppError> {
        if let Err(e) = authorize_self(actor, Capability::UnlockLeads, organizer_id) {
            tracing::warn!(
                "Rejected unlock of {} for {} by {}",
                lead_id,
                organizer_id,
                actor.id
            );
            return Err(e);
        }

        let mut uow = self.store.begin().await?;
        let organizer = lock_existing_organizer(uow.as_mut(), organizer_id).await?;
        let lead = uow
            .lock_lead(lead_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", lead_id)))?;

        let trip = uow
            .find_trip(&lead.trip_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Trip {} not found", lead.trip_id)))?;
        if trip.organizer_id != organizer_id {
            tracing::warn!(
                "Organizer {} tried to unlock lead {} on foreign trip {}",
                organizer_id,
                lead_id,
                trip.id
            );
            return Err(AppError::Forbidden(format!(
                "Lead {} does not belong to organizer {}",
                lead_id, organizer_id
            )));
        }

        let available = organizer.lead_credits.available;
        if available < UNLOCK_COST {
            return Err(AppError::InsufficientCredits(format!(
                "Organizer {} has no lead credits left",
                organizer_id
            )));
        }
        if lead.is_unlocked || organizer.has_unlocked(lead_id) {
            return Err(AppError::AlreadyUnlocked(format!(
                "Lead {} is already unlocked",
                lead_id
            )));
        }

        let now = Utc::now();
        let unlock = LeadUnlock {
            id: Uuid::new_v4().to_string(),
            lead_id: lead_id.to_string(),
            cost: UNLOCK_COST,
            timestamp: now,
        };
        uow.set_available_credits(organizer_id, available - UNLOCK_COST)
            .await?;
        uow.append_unlock(organizer_id, &unlock).await?;
        uow.mark_lead_unlocked(lead_id, organizer_id, now).await?;

        let updated = lock_existing_organizer(uow.as_mut(), organizer_id).await?;
        verify_consistency(&updated)?;
        let unlocked = uow
            .lock_lead(lead_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", lead_id)))?;
        uow.commit().await?;

        tracing::info!(
            "Organizer {} unlocked lead {}, {} credits left",
            organizer_id,
            lead_id,
            updated.lead_credits.available
        );
        Ok((updated, unlocked))
    }
}
