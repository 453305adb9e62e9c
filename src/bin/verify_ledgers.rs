//! Scans every organizer and reports lead-credit ledger violations.
//!
//! Read-only: inconsistencies are reported, never repaired. Exits non-zero
//! if any organizer fails the check.

use dotenvy::dotenv;
use rust_organizer_api::db_storage::PgStore;
use rust_organizer_api::ledger::verify_consistency;
use rust_organizer_api::repository::Repository;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt::init();

    let database_url = env::var("DB_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("DB_URL or DATABASE_URL must be set"))?;
    let store = PgStore::connect(&database_url, 4).await?;

    let ids = store.list_organizer_ids().await?;
    tracing::info!("Checking ledgers of {} organizers...", ids.len());

    let mut violations = 0usize;
    for id in &ids {
        let Some(organizer) = store.find_organizer(id).await? else {
            continue;
        };

        if let Err(e) = verify_consistency(&organizer) {
            violations += 1;
            println!("{}: {}", id, e);
        }

        let mut seen = std::collections::HashSet::new();
        for unlock in &organizer.lead_unlock_history {
            if !seen.insert(unlock.lead_id.as_str()) {
                violations += 1;
                println!("{}: lead {} unlocked more than once", id, unlock.lead_id);
            }
        }
    }

    tracing::info!(
        "Ledger check complete. {} organizers, {} violations.",
        ids.len(),
        violations
    );

    if violations > 0 {
        anyhow::bail!("{} ledger violations found", violations);
    }
    Ok(())
}
