use crate::audit;
use crate::auth::Actor;
use crate::config::Config;
use crate::errors::AppError;
use crate::kyc::KycService;
use crate::ledger::LedgerService;
use crate::leads::LeadService;
use crate::models::*;
use crate::notifier::NotificationSink;
use crate::repository::Repository;
use crate::unlock::UnlockService;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Shared application state injected into handlers.
pub struct AppState {
    /// Persistence backend (Postgres or in-memory).
    pub store: Arc<dyn Repository>,
    /// Application configuration.
    pub config: Config,
    pub kyc: KycService,
    pub ledger: LedgerService,
    pub unlocks: UnlockService,
    pub leads: LeadService,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Repository>,
        config: Config,
        notifier: Option<Arc<dyn NotificationSink>>,
    ) -> Self {
        Self {
            kyc: KycService::new(store.clone(), config.required_documents.clone(), notifier),
            ledger: LedgerService::new(store.clone(), config.lead_packages.clone()),
            unlocks: UnlockService::new(store.clone()),
            leads: LeadService::new(store.clone(), config.default_phone_region.clone()),
            store,
            config,
        }
    }
}

/// All routes except `/health`.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/organizers", post(register_organizer))
        .route("/api/v1/organizers/:id", get(get_organizer))
        .route(
            "/api/v1/organizers/:id/documents/:doc_type",
            put(upload_document),
        )
        .route(
            "/api/v1/organizers/:id/vendor-agreement",
            post(submit_vendor_agreement),
        )
        .route(
            "/api/v1/organizers/:id/submit-verification",
            post(submit_for_verification),
        )
        .route("/api/v1/organizers/:id/credits", get(get_balance))
        .route(
            "/api/v1/organizers/:id/credits/purchases",
            post(purchase_package),
        )
        .route("/api/v1/organizers/:id/leads", get(list_leads))
        .route("/api/v1/lead-packages", get(list_packages))
        .route("/api/v1/trips", post(create_trip))
        .route("/api/v1/trips/:trip_id/leads", post(capture_lead))
        .route("/api/v1/leads/unlock", post(unlock_lead))
        .route("/api/v1/admin/organizers/status", patch(set_kyc_status))
        .route(
            "/api/v1/admin/organizers/documents/status",
            patch(set_document_status),
        )
        .route(
            "/api/v1/admin/organizers/vendor-agreement/status",
            patch(set_vendor_agreement_status),
        )
        .route("/api/v1/admin/audit-logs", get(list_audit_logs))
        .route("/api/v1/admin/notifications", get(list_notifications))
}

/// Full application router without middleware.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api_router())
        .with_state(state)
}

/// Health check endpoint.
///
/// Returns the service status and version.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-organizer-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

// ============ Organizer KYC ============

/// POST /api/v1/organizers
pub async fn register_organizer(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<RegisterOrganizerRequest>,
) -> Result<(StatusCode, Json<Organizer>), AppError> {
    let organizer = state.kyc.register_organizer(&actor, &payload).await?;
    Ok((StatusCode::CREATED, Json(organizer)))
}

/// GET /api/v1/organizers/:id
pub async fn get_organizer(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<Organizer>, AppError> {
    Ok(Json(state.kyc.get_organizer(&actor, &id).await?))
}

/// PUT /api/v1/organizers/:id/documents/:doc_type
pub async fn upload_document(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path((id, doc_type)): Path<(String, String)>,
    Json(payload): Json<FileRefRequest>,
) -> Result<Json<Organizer>, AppError> {
    let organizer = state
        .kyc
        .upload_document(&actor, &id, &doc_type, &payload.file_ref)
        .await?;
    Ok(Json(organizer))
}

/// POST /api/v1/organizers/:id/vendor-agreement
pub async fn submit_vendor_agreement(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
    Json(payload): Json<FileRefRequest>,
) -> Result<Json<Organizer>, AppError> {
    let organizer = state
        .kyc
        .submit_vendor_agreement(&actor, &id, &payload.file_ref)
        .await?;
    Ok(Json(organizer))
}

/// POST /api/v1/organizers/:id/submit-verification
pub async fn submit_for_verification(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<Organizer>, AppError> {
    Ok(Json(state.kyc.submit_for_verification(&actor, &id).await?))
}

/// PATCH /api/v1/admin/organizers/status
pub async fn set_kyc_status(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<SetKycStatusRequest>,
) -> Result<Json<Organizer>, AppError> {
    let organizer = state
        .kyc
        .set_kyc_status(&actor, &payload.organizer_id, &payload.new_status)
        .await?;
    Ok(Json(organizer))
}

/// PATCH /api/v1/admin/organizers/documents/status
pub async fn set_document_status(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<SetDocumentStatusRequest>,
) -> Result<Json<Organizer>, AppError> {
    let organizer = state
        .kyc
        .set_document_status(
            &actor,
            &payload.organizer_id,
            &payload.doc_type,
            &payload.new_status,
        )
        .await?;
    Ok(Json(organizer))
}

/// PATCH /api/v1/admin/organizers/vendor-agreement/status
pub async fn set_vendor_agreement_status(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<SetAgreementStatusRequest>,
) -> Result<Json<Organizer>, AppError> {
    let organizer = state
        .kyc
        .set_vendor_agreement_status(&actor, &payload.organizer_id, &payload.new_status)
        .await?;
    Ok(Json(organizer))
}

// ============ Credits ============

/// GET /api/v1/organizers/:id/credits
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<BalanceResponse>, AppError> {
    let available = state.ledger.balance_for(&actor, &id).await?;
    Ok(Json(BalanceResponse {
        organizer_id: id,
        available,
    }))
}

/// POST /api/v1/organizers/:id/credits/purchases
pub async fn purchase_package(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
    Json(payload): Json<PurchasePackageRequest>,
) -> Result<(StatusCode, Json<Organizer>), AppError> {
    let organizer = state
        .ledger
        .purchase_package(&actor, &id, &payload.package_id)
        .await?;
    Ok((StatusCode::CREATED, Json(organizer)))
}

/// GET /api/v1/lead-packages
pub async fn list_packages(State(state): State<Arc<AppState>>) -> Json<Vec<LeadPackage>> {
    Json(state.ledger.list_packages().to_vec())
}

// ============ Trips & Leads ============

/// POST /api/v1/trips
pub async fn create_trip(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<CreateTripRequest>,
) -> Result<(StatusCode, Json<Trip>), AppError> {
    let trip = state.leads.create_trip(&actor, &payload).await?;
    Ok((StatusCode::CREATED, Json(trip)))
}

/// POST /api/v1/trips/:trip_id/leads
///
/// Public lead-capture form; the actor headers are optional.
pub async fn capture_lead(
    State(state): State<Arc<AppState>>,
    actor: Option<Actor>,
    Path(trip_id): Path<String>,
    Json(payload): Json<CaptureLeadRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    let lead = state
        .leads
        .capture_lead(actor.as_ref(), &trip_id, &payload)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            success: true,
            message: format!("Lead {} received", lead.id),
        }),
    ))
}

/// GET /api/v1/organizers/:id/leads
pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<Vec<LeadView>>, AppError> {
    Ok(Json(state.leads.list_leads(&actor, &id).await?))
}

/// POST /api/v1/leads/unlock
///
/// The acting organizer is the caller; returns the updated organizer and
/// its full lead list with the new lead revealed.
pub async fn unlock_lead(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<UnlockLeadRequest>,
) -> Result<Json<UnlockLeadResponse>, AppError> {
    let (organizer, lead) = state
        .unlocks
        .unlock_lead(&actor, &actor.id, &payload.lead_id)
        .await?;
    let leads = leads_after_unlock(state.leads.list_leads(&actor, &organizer.id).await, &lead);
    Ok(Json(UnlockLeadResponse { organizer, leads }))
}

/// The credit is already spent once this runs, so a failed listing
/// degrades to the unlocked lead alone instead of an error.
fn leads_after_unlock(listed: Result<Vec<LeadView>, AppError>, unlocked: &Lead) -> Vec<LeadView> {
    match listed {
        Ok(leads) => leads,
        Err(e) => {
            tracing::error!(
                "Lead listing failed after unlocking {}: {}",
                unlocked.id,
                e
            );
            vec![LeadView::from(unlocked)]
        }
    }
}

// ============ Admin ============

/// GET /api/v1/admin/audit-logs
pub async fn list_audit_logs(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<Vec<AuditLogEntry>>, AppError> {
    Ok(Json(
        audit::list_audit_logs(state.store.as_ref(), &actor, &query).await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    pub limit: Option<u32>,
}

/// GET /api/v1/admin/notifications
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<Vec<AdminNotification>>, AppError> {
    let limit = crate::repository::effective_audit_limit(query.limit);
    Ok(Json(
        audit::list_notifications(state.store.as_ref(), &actor, limit).await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn unlocked_lead() -> Lead {
        Lead {
            id: "LEAD_A".into(),
            trip_id: "TRIP1".into(),
            name: "Asha Verma".into(),
            email: Some("asha.verma@example.com".into()),
            phone: Some("+919876543210".into()),
            message: None,
            is_unlocked: true,
            unlocked_by: Some("ORG1".into()),
            unlocked_at: Some(Utc::now()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn failed_listing_after_unlock_returns_the_unlocked_lead() {
        let lead = unlocked_lead();
        let leads = leads_after_unlock(
            Err(AppError::StorageError("connection reset".into())),
            &lead,
        );
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].id, "LEAD_A");
        assert_eq!(leads[0].email.as_deref(), Some("asha.verma@example.com"));
        assert!(leads[0].is_unlocked);
    }

    #[test]
    fn successful_listing_after_unlock_is_returned_as_is() {
        let lead = unlocked_lead();
        let listed = vec![LeadView::from(&lead), LeadView::from(&lead)];
        assert_eq!(leads_after_unlock(Ok(listed), &lead).len(), 2);
    }
}
