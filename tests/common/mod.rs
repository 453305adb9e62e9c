//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use bigdecimal::BigDecimal;
use chrono::Utc;
use rust_organizer_api::auth::Actor;
use rust_organizer_api::config::Config;
use rust_organizer_api::kyc::KycService;
use rust_organizer_api::ledger::LedgerService;
use rust_organizer_api::leads::LeadService;
use rust_organizer_api::memory_store::MemoryStore;
use rust_organizer_api::models::{
    AdminNotification, Lead, Organizer, RegisterOrganizerRequest, Trip,
};
use rust_organizer_api::notifier::NotificationSink;
use rust_organizer_api::repository::Repository;
use rust_organizer_api::unlock::UnlockService;
use std::sync::{Arc, Mutex};

/// Collects dispatched notifications instead of sending them.
#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<AdminNotification>>,
}

impl RecordingSink {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl NotificationSink for RecordingSink {
    fn dispatch(&self, notification: AdminNotification) {
        self.sent.lock().unwrap().push(notification);
    }
}

pub struct Fixture {
    pub store: MemoryStore,
    pub repo: Arc<dyn Repository>,
    pub config: Config,
    pub sink: Arc<RecordingSink>,
    pub kyc: KycService,
    pub ledger: Arc<LedgerService>,
    pub unlocks: Arc<UnlockService>,
    pub leads: LeadService,
}

pub fn fixture() -> Fixture {
    let store = MemoryStore::new();
    let repo: Arc<dyn Repository> = Arc::new(store.clone());
    let config = Config::default();
    let sink = Arc::new(RecordingSink::default());
    let notifier: Arc<dyn NotificationSink> = sink.clone();

    Fixture {
        kyc: KycService::new(
            repo.clone(),
            config.required_documents.clone(),
            Some(notifier),
        ),
        ledger: Arc::new(LedgerService::new(repo.clone(), config.lead_packages.clone())),
        unlocks: Arc::new(UnlockService::new(repo.clone())),
        leads: LeadService::new(repo.clone(), config.default_phone_region.clone()),
        store,
        repo,
        config,
        sink,
    }
}

impl Fixture {
    pub async fn register(&self, organizer_id: &str) -> Organizer {
        self.kyc
            .register_organizer(
                &Actor::organizer(organizer_id),
                &RegisterOrganizerRequest {
                    business_name: format!("{} Adventures", organizer_id),
                    contact_email: Some(format!("{}@example.com", organizer_id.to_lowercase())),
                },
            )
            .await
            .unwrap()
    }

    /// Registers an organizer and books `credits` for it.
    pub async fn organizer_with_credits(&self, organizer_id: &str, credits: u32) -> Organizer {
        self.register(organizer_id).await;
        if credits == 0 {
            return self.repo.find_organizer(organizer_id).await.unwrap().unwrap();
        }
        self.ledger
            .record_purchase(organizer_id, "seed", credits, BigDecimal::from(100))
            .await
            .unwrap()
    }

    pub async fn trip(&self, trip_id: &str, organizer_id: &str) {
        let mut uow = self.repo.begin().await.unwrap();
        uow.insert_trip(&Trip {
            id: trip_id.to_string(),
            organizer_id: organizer_id.to_string(),
            title: format!("Trip {}", trip_id),
            destination: Some("Manali".to_string()),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        uow.commit().await.unwrap();
    }

    pub async fn lead(&self, lead_id: &str, trip_id: &str) {
        let mut uow = self.repo.begin().await.unwrap();
        uow.insert_lead(&Lead {
            id: lead_id.to_string(),
            trip_id: trip_id.to_string(),
            name: "Asha Verma".to_string(),
            email: Some("asha.verma@example.com".to_string()),
            phone: Some("+919876543210".to_string()),
            message: Some("Is the October batch open?".to_string()),
            is_unlocked: false,
            unlocked_by: None,
            unlocked_at: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        uow.commit().await.unwrap();
    }

    pub async fn organizer(&self, organizer_id: &str) -> Organizer {
        self.repo.find_organizer(organizer_id).await.unwrap().unwrap()
    }

    /// Uploads every required document and the vendor agreement.
    pub async fn complete_profile(&self, organizer_id: &str) {
        let actor = Actor::organizer(organizer_id);
        for doc_type in self.config.required_documents.clone() {
            self.kyc
                .upload_document(&actor, organizer_id, &doc_type, &format!("s3://kyc/{}", doc_type))
                .await
                .unwrap();
        }
        self.kyc
            .submit_vendor_agreement(&actor, organizer_id, "s3://kyc/agreement.pdf")
            .await
            .unwrap();
    }
}
