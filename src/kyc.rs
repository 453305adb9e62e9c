//! Organizer KYC state machine.
//!
//! `Pending -> Verified | Rejected | Suspended`, and an admin may reset any
//! state back to `Pending`. Only [`KycService::set_kyc_status`] moves an
//! organizer out of `Pending`.

use crate::audit::{self, actions, kinds, modules};
use crate::auth::{authorize, authorize_self, authorize_self_or_admin, Actor, Capability};
use crate::errors::AppError;
use crate::leads::is_valid_email;
use crate::models::{
    AgreementStatus, DocumentStatus, KycStatus, Organizer, RegisterOrganizerRequest,
};
use crate::notifier::{dispatch_all, NotificationSink};
use crate::repository::{lock_existing_organizer, Repository};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

/// True if the state table permits `from -> to`.
pub fn can_transition(from: KycStatus, to: KycStatus) -> bool {
    matches!(
        (from, to),
        (_, KycStatus::Pending) | (KycStatus::Pending, _)
    )
}

/// Lists what still blocks a verification request; empty means ready.
pub fn missing_requirements(organizer: &Organizer, required_documents: &[String]) -> Vec<String> {
    let mut missing = Vec::new();

    for doc_type in required_documents {
        if organizer.document(doc_type).is_none() {
            missing.push(format!("document '{}' missing", doc_type));
        }
    }
    for document in &organizer.documents {
        if !document.status.is_provided() {
            missing.push(format!(
                "document '{}' is {}",
                document.doc_type, document.status
            ));
        }
    }
    if !organizer.vendor_agreement_status.is_provided() {
        missing.push(format!(
            "vendor agreement is {}",
            organizer.vendor_agreement_status
        ));
    }

    missing
}

pub struct KycService {
    store: Arc<dyn Repository>,
    required_documents: Vec<String>,
    notifier: Option<Arc<dyn NotificationSink>>,
}

impl KycService {
    pub fn new(
        store: Arc<dyn Repository>,
        required_documents: Vec<String>,
        notifier: Option<Arc<dyn NotificationSink>>,
    ) -> Self {
        Self {
            store,
            required_documents,
            notifier,
        }
    }

    /// Creates the actor's own organizer record with every required document `Missing`.
    pub async fn register_organizer(
        &self,
        actor: &Actor,
        request: &RegisterOrganizerRequest,
    ) -> Result<Organizer, AppError> {
        authorize(actor, Capability::RegisterOrganizer)?;

        let business_name = request.business_name.trim();
        if business_name.is_empty() {
            return Err(AppError::BadRequest(
                "businessName cannot be empty".to_string(),
            ));
        }
        let contact_email = request
            .contact_email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty());
        if let Some(email) = contact_email {
            if !is_valid_email(email) {
                return Err(AppError::BadRequest(format!(
                    "Invalid contactEmail: {}",
                    email
                )));
            }
        }

        let organizer = Organizer::new(
            actor.id.clone(),
            business_name,
            contact_email.map(str::to_string),
            &self.required_documents,
        );

        let mut uow = self.store.begin().await?;
        uow.insert_organizer(&organizer).await?;
        uow.commit().await?;

        tracing::info!("Organizer {} registered", organizer.id);
        Ok(organizer)
    }

    pub async fn get_organizer(&self, actor: &Actor, organizer_id: &str) -> Result<Organizer, AppError> {
        authorize_self_or_admin(actor, Capability::ManageOwnProfile, organizer_id)?;
        self.store
            .find_organizer(organizer_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Organizer {} not found", organizer_id)))
    }

    /// Stores a file reference and marks the document `Uploaded`.
    ///
    /// Re-uploading a reviewed document puts it back to `Uploaded`.
    pub async fn upload_document(
        &self,
        actor: &Actor,
        organizer_id: &str,
        doc_type: &str,
        file_ref: &str,
    ) -> Result<Organizer, AppError> {
        authorize_self(actor, Capability::ManageOwnProfile, organizer_id)?;
        let file_ref = non_empty_file_ref(file_ref)?;

        let mut uow = self.store.begin().await?;
        let organizer = lock_existing_organizer(uow.as_mut(), organizer_id).await?;
        let mut document = organizer
            .document(doc_type)
            .cloned()
            .ok_or_else(|| document_not_found(organizer_id, doc_type))?;

        document.status = DocumentStatus::Uploaded;
        document.file_ref = Some(file_ref.to_string());
        document.updated_at = Some(Utc::now());
        uow.update_document(organizer_id, &document).await?;

        let updated = lock_existing_organizer(uow.as_mut(), organizer_id).await?;
        uow.commit().await?;

        tracing::info!("Organizer {} uploaded document '{}'", organizer_id, doc_type);
        Ok(updated)
    }

    pub async fn submit_vendor_agreement(
        &self,
        actor: &Actor,
        organizer_id: &str,
        file_ref: &str,
    ) -> Result<Organizer, AppError> {
        authorize_self(actor, Capability::ManageOwnProfile, organizer_id)?;
        let file_ref = non_empty_file_ref(file_ref)?;

        let mut uow = self.store.begin().await?;
        lock_existing_organizer(uow.as_mut(), organizer_id).await?;
        uow.update_vendor_agreement(organizer_id, AgreementStatus::Submitted, Some(file_ref))
            .await?;
        let updated = lock_existing_organizer(uow.as_mut(), organizer_id).await?;
        uow.commit().await?;

        tracing::info!("Organizer {} submitted vendor agreement", organizer_id);
        Ok(updated)
    }

    /// Queues the organizer for admin review.
    ///
    /// Allowed from `Pending` and `Rejected`. Emits exactly one admin
    /// notification and no audit entry.
    pub async fn submit_for_verification(
        &self,
        actor: &Actor,
        organizer_id: &str,
    ) -> Result<Organizer, AppError> {
        authorize_self(actor, Capability::SubmitForVerification, organizer_id)?;

        let mut uow = self.store.begin().await?;
        let organizer = lock_existing_organizer(uow.as_mut(), organizer_id).await?;

        if matches!(
            organizer.kyc_status,
            KycStatus::Verified | KycStatus::Suspended
        ) {
            return Err(AppError::InvalidStatus(format!(
                "Organizer {} is {} and cannot resubmit for verification",
                organizer_id, organizer.kyc_status
            )));
        }

        let missing = missing_requirements(&organizer, &self.required_documents);
        if !missing.is_empty() {
            tracing::debug!(
                "Organizer {} not ready for verification: {:?}",
                organizer_id,
                missing
            );
            return Err(AppError::IncompleteProfile(format!(
                "Profile incomplete: {}",
                missing.join("; ")
            )));
        }

        uow.update_kyc_status(organizer_id, KycStatus::Pending)
            .await?;
        let notification = audit::notify_admins(
            uow.as_mut(),
            organizer_id,
            kinds::VERIFICATION_REQUESTED,
            format!(
                "{} ({}) submitted their profile for verification",
                organizer.business_name, organizer_id
            ),
        )
        .await?;
        let updated = lock_existing_organizer(uow.as_mut(), organizer_id).await?;
        uow.commit().await?;

        tracing::info!("Organizer {} submitted for verification", organizer_id);
        dispatch_all(self.notifier.as_ref(), vec![notification]);
        Ok(updated)
    }

    /// Admin transition through the KYC state table.
    pub async fn set_kyc_status(
        &self,
        actor: &Actor,
        organizer_id: &str,
        new_status: &str,
    ) -> Result<Organizer, AppError> {
        if let Err(e) = authorize(actor, Capability::ManageKyc) {
            tracing::warn!("Rejected KYC change on {} by {}", organizer_id, actor.id);
            return Err(e);
        }
        let new_status: KycStatus = new_status.parse()?;

        let mut uow = self.store.begin().await?;
        let organizer = lock_existing_organizer(uow.as_mut(), organizer_id).await?;
        let old_status = organizer.kyc_status;

        if !can_transition(old_status, new_status) {
            return Err(AppError::InvalidStatus(format!(
                "Transition {} -> {} is not allowed",
                old_status, new_status
            )));
        }

        uow.update_kyc_status(organizer_id, new_status).await?;
        audit::record(
            uow.as_mut(),
            actor,
            actions::KYC_STATUS_CHANGED,
            modules::KYC,
            json!({
                "organizerId": organizer_id,
                "from": old_status,
                "to": new_status,
            }),
        )
        .await?;
        let updated = lock_existing_organizer(uow.as_mut(), organizer_id).await?;
        uow.commit().await?;

        tracing::info!(
            "Organizer {} KYC status {} -> {} by {}",
            organizer_id,
            old_status,
            new_status,
            actor.id
        );
        Ok(updated)
    }

    /// Admin review of one document. Never touches `kycStatus`.
    pub async fn set_document_status(
        &self,
        actor: &Actor,
        organizer_id: &str,
        doc_type: &str,
        new_status: &str,
    ) -> Result<Organizer, AppError> {
        if let Err(e) = authorize(actor, Capability::ReviewDocuments) {
            tracing::warn!("Rejected document review on {} by {}", organizer_id, actor.id);
            return Err(e);
        }
        let new_status: DocumentStatus = new_status.parse()?;

        let mut uow = self.store.begin().await?;
        let organizer = lock_existing_organizer(uow.as_mut(), organizer_id).await?;
        let mut document = organizer
            .document(doc_type)
            .cloned()
            .ok_or_else(|| document_not_found(organizer_id, doc_type))?;
        let old_status = document.status;

        document.status = new_status;
        document.updated_at = Some(Utc::now());
        uow.update_document(organizer_id, &document).await?;
        audit::record(
            uow.as_mut(),
            actor,
            actions::DOCUMENT_STATUS_CHANGED,
            modules::DOCUMENTS,
            json!({
                "organizerId": organizer_id,
                "docType": doc_type,
                "from": old_status,
                "to": new_status,
            }),
        )
        .await?;
        let updated = lock_existing_organizer(uow.as_mut(), organizer_id).await?;
        uow.commit().await?;

        tracing::info!(
            "Organizer {} document '{}' {} -> {}",
            organizer_id,
            doc_type,
            old_status,
            new_status
        );
        Ok(updated)
    }

    pub async fn set_vendor_agreement_status(
        &self,
        actor: &Actor,
        organizer_id: &str,
        new_status: &str,
    ) -> Result<Organizer, AppError> {
        if let Err(e) = authorize(actor, Capability::ReviewDocuments) {
            tracing::warn!("Rejected agreement review on {} by {}", organizer_id, actor.id);
            return Err(e);
        }
        let new_status: AgreementStatus = new_status.parse()?;

        let mut uow = self.store.begin().await?;
        let organizer = lock_existing_organizer(uow.as_mut(), organizer_id).await?;
        let old_status = organizer.vendor_agreement_status;

        uow.update_vendor_agreement(organizer_id, new_status, None)
            .await?;
        audit::record(
            uow.as_mut(),
            actor,
            actions::AGREEMENT_STATUS_CHANGED,
            modules::VENDOR_AGREEMENT,
            json!({
                "organizerId": organizer_id,
                "from": old_status,
                "to": new_status,
            }),
        )
        .await?;
        let updated = lock_existing_organizer(uow.as_mut(), organizer_id).await?;
        uow.commit().await?;

        tracing::info!(
            "Organizer {} vendor agreement {} -> {}",
            organizer_id,
            old_status,
            new_status
        );
        Ok(updated)
    }
}

fn non_empty_file_ref(file_ref: &str) -> Result<&str, AppError> {
    let file_ref = file_ref.trim();
    if file_ref.is_empty() {
        return Err(AppError::BadRequest("fileRef cannot be empty".to_string()));
    }
    Ok(file_ref)
}

fn document_not_found(organizer_id: &str, doc_type: &str) -> AppError {
    AppError::DocumentNotFound(format!(
        "Organizer {} has no document '{}'",
        organizer_id, doc_type
    ))
}
