//! Trips, lead capture and the organizer's lead inbox.

use crate::auth::{authorize, authorize_self_or_admin, Actor, Capability};
use crate::errors::AppError;
use crate::models::{CaptureLeadRequest, CreateTripRequest, Lead, LeadView, Trip};
use crate::repository::Repository;
use chrono::Utc;
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

fn email_regex() -> &'static Regex {
    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    EMAIL_REGEX.get_or_init(|| {
        // RFC 5322 simplified: local@domain.tld
        Regex::new(
            r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
        )
        .expect("email pattern is a valid regex")
    })
}

/// Validate email address format.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 5 || email.len() > 254 {
        return false;
    }
    email_regex().is_match(email)
}

/// Parses a phone number and returns it in E.164 form.
///
/// Numbers without a country code are read in `default_region`
/// (an ISO 3166 code such as `IN`).
pub fn normalize_phone(raw: &str, default_region: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    if trimmed.len() < 6 {
        return Err(AppError::BadRequest(format!("Phone number too short: {}", raw)));
    }

    let region = default_region.parse::<CountryId>().ok();
    let number = phonenumber::parse(region, trimmed)
        .map_err(|e| AppError::BadRequest(format!("Invalid phone number '{}': {:?}", raw, e)))?;

    if !phonenumber::is_valid(&number) {
        tracing::debug!("Rejected phone number: {}", raw);
        return Err(AppError::BadRequest(format!("Invalid phone number: {}", raw)));
    }

    Ok(number.format().mode(Mode::E164).to_string())
}

fn optional_field(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub struct LeadService {
    store: Arc<dyn Repository>,
    default_phone_region: String,
}

impl LeadService {
    pub fn new(store: Arc<dyn Repository>, default_phone_region: String) -> Self {
        Self {
            store,
            default_phone_region,
        }
    }

    /// Creates a trip owned by the calling organizer.
    pub async fn create_trip(
        &self,
        actor: &Actor,
        request: &CreateTripRequest,
    ) -> Result<Trip, AppError> {
        authorize(actor, Capability::ManageTrips)?;

        let title = request.title.trim();
        if title.is_empty() {
            return Err(AppError::BadRequest("title cannot be empty".to_string()));
        }

        let mut uow = self.store.begin().await?;
        if uow.lock_organizer(&actor.id).await?.is_none() {
            return Err(AppError::NotFound(format!(
                "Organizer {} not found",
                actor.id
            )));
        }

        let trip = Trip {
            id: Uuid::new_v4().to_string(),
            organizer_id: actor.id.clone(),
            title: title.to_string(),
            destination: optional_field(&request.destination).map(str::to_string),
            created_at: Utc::now(),
        };
        uow.insert_trip(&trip).await?;
        uow.commit().await?;

        tracing::info!("Organizer {} created trip {}", actor.id, trip.id);
        Ok(trip)
    }

    /// Records a traveler enquiry on a trip. Anonymous callers are allowed.
    ///
    /// At least one contact channel is required and every provided one
    /// must be valid.
    pub async fn capture_lead(
        &self,
        actor: Option<&Actor>,
        trip_id: &str,
        request: &CaptureLeadRequest,
    ) -> Result<Lead, AppError> {
        if let Some(actor) = actor {
            authorize(actor, Capability::CaptureLeads)?;
        }

        let name = request.name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("name cannot be empty".to_string()));
        }

        let email = match optional_field(&request.email) {
            Some(email) if is_valid_email(email) => Some(email.to_lowercase()),
            Some(email) => {
                return Err(AppError::BadRequest(format!("Invalid email: {}", email)));
            }
            None => None,
        };
        let phone = optional_field(&request.phone)
            .map(|raw| normalize_phone(raw, &self.default_phone_region))
            .transpose()?;

        if email.is_none() && phone.is_none() {
            return Err(AppError::BadRequest(
                "A valid email or phone number is required".to_string(),
            ));
        }

        let mut uow = self.store.begin().await?;
        if uow.find_trip(trip_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Trip {} not found", trip_id)));
        }

        let lead = Lead {
            id: Uuid::new_v4().to_string(),
            trip_id: trip_id.to_string(),
            name: name.to_string(),
            email,
            phone,
            message: optional_field(&request.message).map(str::to_string),
            is_unlocked: false,
            unlocked_by: None,
            unlocked_at: None,
            created_at: Utc::now(),
        };
        uow.insert_lead(&lead).await?;
        uow.commit().await?;

        tracing::info!("Captured lead {} on trip {}", lead.id, trip_id);
        Ok(lead)
    }

    /// The organizer's leads with contact details of locked leads masked.
    pub async fn list_leads(
        &self,
        actor: &Actor,
        organizer_id: &str,
    ) -> Result<Vec<LeadView>, AppError> {
        authorize_self_or_admin(actor, Capability::ViewOwnLeads, organizer_id)?;

        if self.store.find_organizer(organizer_id).await?.is_none() {
            return Err(AppError::NotFound(format!(
                "Organizer {} not found",
                organizer_id
            )));
        }

        let leads = self.store.list_leads_for_organizer(organizer_id).await?;
        Ok(leads.iter().map(LeadView::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("asha.verma@example.com"));
        assert!(is_valid_email("a+b@mail.co.in"));
        assert!(!is_valid_email("asha"));
        assert!(!is_valid_email("asha@localhost"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("a b@example.com"));
    }

    #[test]
    fn phone_normalized_to_e164() {
        assert_eq!(
            normalize_phone("98765 43210", "IN").unwrap(),
            "+919876543210"
        );
        assert_eq!(
            normalize_phone("+91 98765 43210", "US").unwrap(),
            "+919876543210"
        );
    }

    #[test]
    fn bad_phone_rejected() {
        assert_eq!(normalize_phone("123", "IN").unwrap_err().code(), "bad_request");
        assert_eq!(
            normalize_phone("not a number", "IN").unwrap_err().code(),
            "bad_request"
        );
    }
}
