//! Lead credit ledger.
//!
//! `available` must always equal purchased credits minus unlock costs. Every
//! mutation re-checks that before committing and aborts the unit of work on a
//! mismatch instead of repairing it.

use crate::auth::{authorize_self, authorize_self_or_admin, Actor, Capability};
use crate::errors::AppError;
use crate::models::{LeadPackage, LeadPurchase, Organizer};
use crate::repository::{lock_existing_organizer, Repository};
use bigdecimal::BigDecimal;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Fails with `LedgerInconsistency` if the balance disagrees with the histories.
pub fn verify_consistency(organizer: &Organizer) -> Result<(), AppError> {
    let expected = organizer.ledger_balance();
    let available = i64::from(organizer.lead_credits.available);

    if expected < 0 || expected != available {
        tracing::error!(
            "Ledger inconsistency for organizer {}: available={}, histories imply {}",
            organizer.id,
            available,
            expected
        );
        return Err(AppError::LedgerInconsistency(format!(
            "Organizer {} has {} credits but histories imply {}",
            organizer.id, available, expected
        )));
    }
    Ok(())
}

pub struct LedgerService {
    store: Arc<dyn Repository>,
    packages: Vec<LeadPackage>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn Repository>, packages: Vec<LeadPackage>) -> Self {
        Self { store, packages }
    }

    /// Appends a purchase and credits the organizer in one unit of work.
    ///
    /// Payment is confirmed upstream; this only books the credits.
    pub async fn record_purchase(
        &self,
        organizer_id: &str,
        package_id: &str,
        credits_purchased: u32,
        price: BigDecimal,
    ) -> Result<Organizer, AppError> {
        if credits_purchased == 0 {
            return Err(AppError::BadRequest(
                "creditsPurchased must be greater than zero".to_string(),
            ));
        }

        let mut uow = self.store.begin().await?;
        let organizer = lock_existing_organizer(uow.as_mut(), organizer_id).await?;

        let available = organizer
            .lead_credits
            .available
            .checked_add(credits_purchased)
            .ok_or_else(|| {
                AppError::BadRequest(format!(
                    "Purchase would overflow the credit balance of {}",
                    organizer_id
                ))
            })?;

        let purchase = LeadPurchase {
            id: Uuid::new_v4().to_string(),
            package_id: package_id.to_string(),
            credits_purchased,
            price,
            timestamp: Utc::now(),
        };
        uow.append_purchase(organizer_id, &purchase).await?;
        uow.set_available_credits(organizer_id, available).await?;

        let updated = lock_existing_organizer(uow.as_mut(), organizer_id).await?;
        verify_consistency(&updated)?;
        uow.commit().await?;

        tracing::info!(
            "Organizer {} purchased {} credits ({}), balance {}",
            organizer_id,
            credits_purchased,
            package_id,
            available
        );
        Ok(updated)
    }

    /// Pure read; takes no locks.
    pub async fn current_balance(&self, organizer_id: &str) -> Result<u32, AppError> {
        let organizer = self
            .store
            .find_organizer(organizer_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Organizer {} not found", organizer_id)))?;
        Ok(organizer.lead_credits.available)
    }

    /// Balance read for the organizer itself or an admin.
    pub async fn balance_for(&self, actor: &Actor, organizer_id: &str) -> Result<u32, AppError> {
        authorize_self_or_admin(actor, Capability::PurchaseCredits, organizer_id)?;
        self.current_balance(organizer_id).await
    }

    /// Books a catalog package for the organizer.
    pub async fn purchase_package(
        &self,
        actor: &Actor,
        organizer_id: &str,
        package_id: &str,
    ) -> Result<Organizer, AppError> {
        authorize_self(actor, Capability::PurchaseCredits, organizer_id)?;

        let package = self
            .packages
            .iter()
            .find(|p| p.id == package_id)
            .ok_or_else(|| AppError::NotFound(format!("Lead package {} not found", package_id)))?;

        self.record_purchase(
            organizer_id,
            &package.id,
            package.credits,
            package.price.clone(),
        )
        .await
    }

    pub fn list_packages(&self) -> &[LeadPackage] {
        &self.packages
    }
}
