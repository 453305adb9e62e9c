//! Organizer KYC and Lead Credit API Library
//!
//! Organizer verification (KYC), the lead-credit ledger, atomic lead
//! unlocks and the audit/notification trail of the travel marketplace.
//!
//! # Modules
//!
//! - `audit`: Audit log and admin notification emitter.
//! - `auth`: Actors, roles and the capability table.
//! - `config`: Configuration management.
//! - `db_storage`: Postgres pool and implementation of the persistence traits.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers and router.
//! - `kyc`: Organizer KYC state machine.
//! - `ledger`: Lead credit ledger.
//! - `leads`: Trips, lead capture and lead listing.
//! - `memory_store`: In-memory implementation of the persistence traits.
//! - `models`: Core data models.
//! - `notifier`: Outbound admin notification relay and its circuit breaker.
//! - `repository`: Persistence traits.
//! - `unlock`: Atomic lead unlock.

pub mod audit;
pub mod auth;
pub mod config;
pub mod db_storage;
pub mod errors;
pub mod handlers;
pub mod kyc;
pub mod ledger;
pub mod leads;
pub mod memory_store;
pub mod models;
pub mod notifier;
pub mod repository;
pub mod unlock;
