use crate::errors::AppError;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

// ============ Status Enums ============

/// Verification status of an organizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KycStatus {
    Pending,
    Verified,
    Rejected,
    Suspended,
}

impl KycStatus {
    pub const ALL: [KycStatus; 4] = [
        KycStatus::Pending,
        KycStatus::Verified,
        KycStatus::Rejected,
        KycStatus::Suspended,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KycStatus::Pending => "Pending",
            KycStatus::Verified => "Verified",
            KycStatus::Rejected => "Rejected",
            KycStatus::Suspended => "Suspended",
        }
    }
}

impl fmt::Display for KycStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KycStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KycStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::InvalidStatus(format!("Unknown KYC status '{}'", s)))
    }
}

/// Review status of a single KYC document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentStatus {
    Missing,
    Uploaded,
    Verified,
    Rejected,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 4] = [
        DocumentStatus::Missing,
        DocumentStatus::Uploaded,
        DocumentStatus::Verified,
        DocumentStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Missing => "Missing",
            DocumentStatus::Uploaded => "Uploaded",
            DocumentStatus::Verified => "Verified",
            DocumentStatus::Rejected => "Rejected",
        }
    }

    /// Whether the document counts towards a complete profile.
    pub fn is_provided(&self) -> bool {
        matches!(self, DocumentStatus::Uploaded | DocumentStatus::Verified)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::InvalidStatus(format!("Unknown document status '{}'", s)))
    }
}

/// Status of the organizer's signed vendor agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgreementStatus {
    NotSubmitted,
    Submitted,
    Verified,
    Rejected,
}

impl AgreementStatus {
    pub const ALL: [AgreementStatus; 4] = [
        AgreementStatus::NotSubmitted,
        AgreementStatus::Submitted,
        AgreementStatus::Verified,
        AgreementStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgreementStatus::NotSubmitted => "NotSubmitted",
            AgreementStatus::Submitted => "Submitted",
            AgreementStatus::Verified => "Verified",
            AgreementStatus::Rejected => "Rejected",
        }
    }

    pub fn is_provided(&self) -> bool {
        matches!(self, AgreementStatus::Submitted | AgreementStatus::Verified)
    }
}

impl fmt::Display for AgreementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgreementStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgreementStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                AppError::InvalidStatus(format!("Unknown vendor agreement status '{}'", s))
            })
    }
}

// ============ Organizer Aggregate ============

/// A KYC document slot on an organizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizerDocument {
    /// Document type, unique per organizer (e.g. `tax_certificate`).
    pub doc_type: String,
    pub status: DocumentStatus,
    /// Reference to the uploaded file in the document store.
    pub file_ref: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Spendable lead credits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadCredits {
    pub available: u32,
}

/// One credit-package purchase. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadPurchase {
    pub id: String,
    pub package_id: String,
    pub credits_purchased: u32,
    pub price: BigDecimal,
    pub timestamp: DateTime<Utc>,
}

/// One lead unlock paid with credits. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadUnlock {
    pub id: String,
    pub lead_id: String,
    pub cost: u32,
    pub timestamp: DateTime<Utc>,
}

/// Trip organizer (advertiser) with its KYC state and credit ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organizer {
    pub id: String,
    pub business_name: String,
    pub contact_email: Option<String>,
    pub kyc_status: KycStatus,
    pub documents: Vec<OrganizerDocument>,
    pub vendor_agreement_status: AgreementStatus,
    pub vendor_agreement_ref: Option<String>,
    pub lead_credits: LeadCredits,
    pub lead_purchase_history: Vec<LeadPurchase>,
    pub lead_unlock_history: Vec<LeadUnlock>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Organizer {
    /// Creates a freshly signed-up organizer: `Pending`, every required
    /// document `Missing`, no agreement and no credits.
    pub fn new(
        id: impl Into<String>,
        business_name: impl Into<String>,
        contact_email: Option<String>,
        required_documents: &[String],
    ) -> Self {
        let documents = required_documents
            .iter()
            .map(|doc_type| OrganizerDocument {
                doc_type: doc_type.clone(),
                status: DocumentStatus::Missing,
                file_ref: None,
                updated_at: None,
            })
            .collect();

        Self {
            id: id.into(),
            business_name: business_name.into(),
            contact_email,
            kyc_status: KycStatus::Pending,
            documents,
            vendor_agreement_status: AgreementStatus::NotSubmitted,
            vendor_agreement_ref: None,
            lead_credits: LeadCredits::default(),
            lead_purchase_history: Vec::new(),
            lead_unlock_history: Vec::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn document(&self, doc_type: &str) -> Option<&OrganizerDocument> {
        self.documents.iter().find(|d| d.doc_type == doc_type)
    }

    pub fn document_mut(&mut self, doc_type: &str) -> Option<&mut OrganizerDocument> {
        self.documents.iter_mut().find(|d| d.doc_type == doc_type)
    }

    /// Balance implied by the histories: purchases minus unlock costs.
    pub fn ledger_balance(&self) -> i64 {
        let purchased: i64 = self
            .lead_purchase_history
            .iter()
            .map(|p| i64::from(p.credits_purchased))
            .sum();
        let spent: i64 = self
            .lead_unlock_history
            .iter()
            .map(|u| i64::from(u.cost))
            .sum();
        purchased - spent
    }

    pub fn has_unlocked(&self, lead_id: &str) -> bool {
        self.lead_unlock_history.iter().any(|u| u.lead_id == lead_id)
    }
}

// ============ Leads & Trips ============

/// A trip published by an organizer. Only ownership matters here.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub id: String,
    pub organizer_id: String,
    pub title: String,
    pub destination: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A traveler's enquiry on a trip. Contact details are paid for via unlock.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub trip_id: String,
    pub name: String,
    pub email: Option<String>,
    /// E.164 formatted.
    pub phone: Option<String>,
    pub message: Option<String>,
    pub is_unlocked: bool,
    pub unlocked_by: Option<String>,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Lead as shown to an organizer; contact details hidden until unlocked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadView {
    pub id: String,
    pub trip_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub message: Option<String>,
    pub is_unlocked: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Lead> for LeadView {
    fn from(lead: &Lead) -> Self {
        let (email, phone) = if lead.is_unlocked {
            (lead.email.clone(), lead.phone.clone())
        } else {
            (
                lead.email.as_deref().map(mask_email),
                lead.phone.as_deref().map(mask_phone),
            )
        };

        Self {
            id: lead.id.clone(),
            trip_id: lead.trip_id.clone(),
            name: mask_name(&lead.name, lead.is_unlocked),
            email,
            phone,
            message: lead.message.clone(),
            is_unlocked: lead.is_unlocked,
            created_at: lead.created_at,
        }
    }
}

fn mask_name(name: &str, unlocked: bool) -> String {
    if unlocked {
        return name.to_string();
    }
    // First name only
    name.split_whitespace().next().unwrap_or_default().to_string()
}

/// `jane.doe@mail.com` -> `j***@mail.com`
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{}***@{}", first, domain)
        }
        None => "***".to_string(),
    }
}

/// `+919876543210` -> `+91******3210`
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 7 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 7), tail)
}

// ============ Audit & Notifications ============

/// Immutable audit record of an administrative action.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: String,
    pub actor_id: String,
    pub action: String,
    pub module: String,
    pub details: serde_json::Value,
    #[sqlx(rename = "created_at")]
    pub timestamp: DateTime<Utc>,
    /// SHA-256 over the other fields (hex encoded).
    pub checksum: String,
}

/// Immutable notification addressed to the admin team.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminNotification {
    pub id: String,
    pub organizer_id: String,
    pub kind: String,
    pub message: String,
    #[sqlx(rename = "created_at")]
    pub timestamp: DateTime<Utc>,
}

/// Purchasable bundle of lead credits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadPackage {
    pub id: String,
    pub name: String,
    pub credits: u32,
    pub price: BigDecimal,
}

// ============ API Request/Response Models ============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterOrganizerRequest {
    pub business_name: String,
    pub contact_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRefRequest {
    pub file_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetKycStatusRequest {
    pub organizer_id: String,
    /// Parsed server-side so unknown values map to `invalid_status`.
    pub new_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetDocumentStatusRequest {
    pub organizer_id: String,
    pub doc_type: String,
    pub new_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAgreementStatusRequest {
    pub organizer_id: String,
    pub new_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchasePackageRequest {
    pub package_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTripRequest {
    pub title: String,
    pub destination: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureLeadRequest {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockLeadRequest {
    pub lead_id: String,
}

/// Result of a successful unlock: the organizer after the debit and its leads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockLeadResponse {
    pub organizer: Organizer,
    pub leads: Vec<LeadView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub organizer_id: String,
    pub available: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

/// Filters for the admin audit-log listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogQuery {
    pub actor_id: Option<String>,
    pub module: Option<String>,
    pub action: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}
