//! Actor resolution and capability checks.
//!
//! The session layer in front of this service resolves the caller and
//! forwards it as `X-Actor-Id` / `X-Actor-Role` headers. Every operation
//! asks [`authorize`] for a [`Capability`]; the role → capability table
//! lives in [`Role::capabilities`] and nowhere else.

use crate::errors::AppError;
use crate::handlers::AppState;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const GATEWAY_TOKEN_HEADER: &str = "x-gateway-token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Organizer,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Organizer => "ORGANIZER",
            Role::Admin => "ADMIN",
        }
    }

    /// The single source of truth for what each role may do.
    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            Role::User => &[Capability::CaptureLeads],
            Role::Organizer => &[
                Capability::CaptureLeads,
                Capability::RegisterOrganizer,
                Capability::ManageOwnProfile,
                Capability::SubmitForVerification,
                Capability::PurchaseCredits,
                Capability::UnlockLeads,
                Capability::ManageTrips,
                Capability::ViewOwnLeads,
            ],
            Role::Admin => &[
                Capability::CaptureLeads,
                Capability::ViewAnyOrganizer,
                Capability::ManageKyc,
                Capability::ReviewDocuments,
                Capability::ViewAuditLog,
                Capability::ViewNotifications,
            ],
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USER" => Ok(Role::User),
            "ORGANIZER" => Ok(Role::Organizer),
            "ADMIN" => Ok(Role::Admin),
            other => Err(AppError::Unauthorized(format!("Unknown role '{}'", other))),
        }
    }
}

/// Something an actor may be allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    CaptureLeads,
    RegisterOrganizer,
    ManageOwnProfile,
    SubmitForVerification,
    PurchaseCredits,
    UnlockLeads,
    ManageTrips,
    ViewOwnLeads,
    ViewAnyOrganizer,
    ManageKyc,
    ReviewDocuments,
    ViewAuditLog,
    ViewNotifications,
}

/// The resolved caller of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self::new(id, Role::Admin)
    }

    pub fn organizer(id: impl Into<String>) -> Self {
        Self::new(id, Role::Organizer)
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self::new(id, Role::User)
    }
}

/// Fails with `Forbidden` unless the actor's role grants `capability`.
pub fn authorize(actor: &Actor, capability: Capability) -> Result<(), AppError> {
    if actor.role.has(capability) {
        return Ok(());
    }
    Err(AppError::Forbidden(format!(
        "{} {} may not perform {:?}",
        actor.role, actor.id, capability
    )))
}

/// `authorize` plus the requirement that the actor *is* the organizer.
pub fn authorize_self(
    actor: &Actor,
    capability: Capability,
    organizer_id: &str,
) -> Result<(), AppError> {
    authorize(actor, capability)?;
    if actor.id != organizer_id {
        return Err(AppError::Forbidden(format!(
            "Actor {} may only act on its own organizer record",
            actor.id
        )));
    }
    Ok(())
}

/// Read access to an organizer: the organizer itself or an admin.
pub fn authorize_self_or_admin(
    actor: &Actor,
    own_capability: Capability,
    organizer_id: &str,
) -> Result<(), AppError> {
    if authorize(actor, Capability::ViewAnyOrganizer).is_ok() {
        return Ok(());
    }
    authorize_self(actor, own_capability, organizer_id)
}

/// Constant-time string comparison (basic implementation)
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Actor {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        // If no gateway token is configured, trust the forwarded headers
        if let Some(ref expected) = state.config.gateway_token {
            let token = parts
                .headers
                .get(GATEWAY_TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| AppError::Unauthorized("Missing X-Gateway-Token header".into()))?;

            if !constant_time_compare(token, expected) {
                tracing::warn!("Invalid gateway token received");
                return Err(AppError::Unauthorized("Invalid gateway token".into()));
            }
        }

        let id = parts
            .headers
            .get(ACTOR_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Unauthorized("No session".into()))?;

        let role = parts
            .headers
            .get(ACTOR_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing actor role".into()))?
            .parse::<Role>()?;

        Ok(Actor::new(id, role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_admins_manage_kyc() {
        assert!(authorize(&Actor::admin("a1"), Capability::ManageKyc).is_ok());
        for actor in [Actor::organizer("o1"), Actor::user("u1")] {
            let err = authorize(&actor, Capability::ManageKyc).unwrap_err();
            assert_eq!(err.code(), "forbidden");
        }
    }

    #[test]
    fn admins_cannot_spend_organizer_credits() {
        assert!(authorize(&Actor::admin("a1"), Capability::UnlockLeads).is_err());
        assert!(authorize(&Actor::admin("a1"), Capability::PurchaseCredits).is_err());
    }

    #[test]
    fn self_check_rejects_other_organizers() {
        let actor = Actor::organizer("ORG1");
        assert!(authorize_self(&actor, Capability::UnlockLeads, "ORG1").is_ok());
        let err = authorize_self(&actor, Capability::UnlockLeads, "ORG2").unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }

    #[test]
    fn admin_reads_any_organizer() {
        let admin = Actor::admin("root");
        assert!(authorize_self_or_admin(&admin, Capability::ManageOwnProfile, "ORG9").is_ok());
        let user = Actor::user("u1");
        assert!(authorize_self_or_admin(&user, Capability::ManageOwnProfile, "u1").is_err());
    }

    #[test]
    fn role_parsing() {
        assert_eq!("organizer".parse::<Role>().unwrap(), Role::Organizer);
        assert_eq!("ADMIN".parse::<Role>().unwrap(), Role::Admin);
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn constant_time_compare_matches_equality() {
        assert!(constant_time_compare("secret", "secret"));
        assert!(!constant_time_compare("secret", "secreT"));
        assert!(!constant_time_compare("secret", "secrets"));
    }
}
