use crate::errors::{AppError, ResultExt};
use crate::models::{
    AdminNotification, AgreementStatus, AuditLogEntry, AuditLogQuery, KycStatus, Lead,
    LeadCredits, LeadPurchase, LeadUnlock, Organizer, OrganizerDocument, Trip,
};
use crate::repository::{effective_audit_limit, Repository, UnitOfWork};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgConnection, PgPool, Postgres, Transaction};

/// Postgres-backed organizer store.
///
/// Units of work are database transactions. `lock_*` reads use
/// `SELECT ... FOR UPDATE`, so the unlock path serializes on the organizer
/// row and then the lead row. `lead_unlocks.lead_id` is UNIQUE and
/// `organizers.credits_available` carries a `>= 0` check, which backs the
/// in-process checks with database constraints.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool against `database_url` and checks connectivity.
    /// The schema itself is applied from `migrations/`.
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        tracing::debug!("Postgres pool ready (max {} connections)", max_connections);
        Ok(Self::new(pool))
    }
}

#[derive(Debug, FromRow)]
struct OrganizerRow {
    id: String,
    business_name: String,
    contact_email: Option<String>,
    kyc_status: String,
    vendor_agreement_status: String,
    vendor_agreement_ref: Option<String>,
    credits_available: i32,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct DocumentRow {
    doc_type: String,
    status: String,
    file_ref: Option<String>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct PurchaseRow {
    id: String,
    package_id: String,
    credits_purchased: i32,
    price: BigDecimal,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct UnlockRow {
    id: String,
    lead_id: String,
    cost: i32,
    created_at: DateTime<Utc>,
}

const ORGANIZER_COLUMNS: &str = r#"
    SELECT id, business_name, contact_email, kyc_status, vendor_agreement_status,
           vendor_agreement_ref, credits_available, created_at, updated_at
    FROM organizers
    WHERE id = $1
"#;

const LEAD_COLUMNS: &str = r#"
    SELECT id, trip_id, name, email, phone, message, is_unlocked,
           unlocked_by, unlocked_at, created_at
    FROM leads
    WHERE id = $1
"#;

fn non_negative(value: i32, what: &str) -> Result<u32, AppError> {
    u32::try_from(value)
        .map_err(|_| AppError::LedgerInconsistency(format!("{} is negative: {}", what, value)))
}

fn stored_status<T>(value: &str) -> Result<T, AppError>
where
    T: std::str::FromStr<Err = AppError>,
{
    value
        .parse()
        .map_err(|e: AppError| AppError::StorageError(format!("corrupt stored status: {}", e)))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

fn to_db_count(value: u32) -> Result<i32, AppError> {
    i32::try_from(value)
        .map_err(|_| AppError::BadRequest(format!("Credit amount {} out of range", value)))
}

/// Loads the full organizer aggregate, optionally locking the organizer row.
async fn load_organizer(
    conn: &mut PgConnection,
    id: &str,
    for_update: bool,
) -> Result<Option<Organizer>, AppError> {
    let sql = if for_update {
        format!("{} FOR UPDATE", ORGANIZER_COLUMNS)
    } else {
        ORGANIZER_COLUMNS.to_string()
    };

    let Some(row) = sqlx::query_as::<_, OrganizerRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .context("loading organizer")?
    else {
        return Ok(None);
    };

    let documents = sqlx::query_as::<_, DocumentRow>(
        r#"
        SELECT doc_type, status, file_ref, updated_at
        FROM organizer_documents
        WHERE organizer_id = $1
        ORDER BY position ASC
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await
    .context("loading organizer documents")?
    .into_iter()
    .map(|d| {
        Ok(OrganizerDocument {
            doc_type: d.doc_type,
            status: stored_status(&d.status)?,
            file_ref: d.file_ref,
            updated_at: d.updated_at,
        })
    })
    .collect::<Result<Vec<_>, AppError>>()?;

    let purchases = sqlx::query_as::<_, PurchaseRow>(
        r#"
        SELECT id, package_id, credits_purchased, price, created_at
        FROM lead_purchases
        WHERE organizer_id = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await
    .context("loading lead purchases")?
    .into_iter()
    .map(|p| {
        Ok(LeadPurchase {
            id: p.id,
            package_id: p.package_id,
            credits_purchased: non_negative(p.credits_purchased, "credits_purchased")?,
            price: p.price,
            timestamp: p.created_at,
        })
    })
    .collect::<Result<Vec<_>, AppError>>()?;

    let unlocks = sqlx::query_as::<_, UnlockRow>(
        r#"
        SELECT id, lead_id, cost, created_at
        FROM lead_unlocks
        WHERE organizer_id = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await
    .context("loading lead unlocks")?
    .into_iter()
    .map(|u| {
        Ok(LeadUnlock {
            id: u.id,
            lead_id: u.lead_id,
            cost: non_negative(u.cost, "unlock cost")?,
            timestamp: u.created_at,
        })
    })
    .collect::<Result<Vec<_>, AppError>>()?;

    Ok(Some(Organizer {
        id: row.id,
        business_name: row.business_name,
        contact_email: row.contact_email,
        kyc_status: stored_status::<KycStatus>(&row.kyc_status)?,
        documents,
        vendor_agreement_status: stored_status::<AgreementStatus>(&row.vendor_agreement_status)?,
        vendor_agreement_ref: row.vendor_agreement_ref,
        lead_credits: LeadCredits {
            available: non_negative(row.credits_available, "credits_available")?,
        },
        lead_purchase_history: purchases,
        lead_unlock_history: unlocks,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }))
}

#[async_trait]
impl Repository for PgStore {
    async fn find_organizer(&self, id: &str) -> Result<Option<Organizer>, AppError> {
        // One snapshot for the organizer row and both ledger tables
        let mut tx = self.pool.begin().await.context("begin organizer read")?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .context("set snapshot isolation")?;
        let organizer = load_organizer(&mut tx, id, false).await?;
        tx.commit().await.context("end organizer read")?;
        Ok(organizer)
    }

    async fn find_lead(&self, id: &str) -> Result<Option<Lead>, AppError> {
        let lead = sqlx::query_as::<_, Lead>(LEAD_COLUMNS)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(lead)
    }

    async fn find_trip(&self, id: &str) -> Result<Option<Trip>, AppError> {
        let trip = sqlx::query_as::<_, Trip>(
            "SELECT id, organizer_id, title, destination, created_at FROM trips WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(trip)
    }

    async fn list_leads_for_organizer(&self, organizer_id: &str) -> Result<Vec<Lead>, AppError> {
        let leads = sqlx::query_as::<_, Lead>(
            r#"
            SELECT l.id, l.trip_id, l.name, l.email, l.phone, l.message, l.is_unlocked,
                   l.unlocked_by, l.unlocked_at, l.created_at
            FROM leads l
            JOIN trips t ON t.id = l.trip_id
            WHERE t.organizer_id = $1
            ORDER BY l.created_at ASC, l.id ASC
            "#,
        )
        .bind(organizer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(leads)
    }

    async fn list_organizer_ids(&self) -> Result<Vec<String>, AppError> {
        let ids = sqlx::query_scalar::<_, String>("SELECT id FROM organizers ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn list_audit_logs(
        &self,
        query: &AuditLogQuery,
    ) -> Result<Vec<AuditLogEntry>, AppError> {
        let entries = sqlx::query_as::<_, AuditLogEntry>(
            r#"
            SELECT id, actor_id, action, module, details, checksum, created_at
            FROM audit_logs
            WHERE ($1::text IS NULL OR actor_id = $1)
              AND ($2::text IS NULL OR module = $2)
              AND ($3::text IS NULL OR action = $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(query.actor_id.as_deref())
        .bind(query.module.as_deref())
        .bind(query.action.as_deref())
        .bind(i64::from(effective_audit_limit(query.limit)))
        .bind(i64::from(query.offset.unwrap_or(0)))
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn list_notifications(&self, limit: u32) -> Result<Vec<AdminNotification>, AppError> {
        let notifications = sqlx::query_as::<_, AdminNotification>(
            r#"
            SELECT id, organizer_id, kind, message, created_at
            FROM admin_notifications
            ORDER BY created_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(notifications)
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError> {
        let tx = self.pool.begin().await.context("starting transaction")?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

/// A single Postgres transaction. Dropping it rolls back.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_organizer(&mut self, id: &str) -> Result<Option<Organizer>, AppError> {
        load_organizer(&mut self.tx, id, true).await
    }

    async fn lock_lead(&mut self, id: &str) -> Result<Option<Lead>, AppError> {
        let sql = format!("{} FOR UPDATE", LEAD_COLUMNS);
        let lead = sqlx::query_as::<_, Lead>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .context("locking lead")?;
        Ok(lead)
    }

    async fn find_trip(&mut self, id: &str) -> Result<Option<Trip>, AppError> {
        let trip = sqlx::query_as::<_, Trip>(
            "SELECT id, organizer_id, title, destination, created_at FROM trips WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(trip)
    }

    async fn insert_organizer(&mut self, organizer: &Organizer) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO organizers (id, business_name, contact_email, kyc_status,
                                    vendor_agreement_status, vendor_agreement_ref,
                                    credits_available, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&organizer.id)
        .bind(&organizer.business_name)
        .bind(organizer.contact_email.as_deref())
        .bind(organizer.kyc_status.as_str())
        .bind(organizer.vendor_agreement_status.as_str())
        .bind(organizer.vendor_agreement_ref.as_deref())
        .bind(to_db_count(organizer.lead_credits.available)?)
        .bind(organizer.created_at)
        .execute(&mut *self.tx)
        .await
        .context("inserting organizer")?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Organizer {} already exists",
                organizer.id
            )));
        }

        for (position, document) in organizer.documents.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO organizer_documents (organizer_id, position, doc_type, status, file_ref, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(&organizer.id)
            .bind(position as i32)
            .bind(&document.doc_type)
            .bind(document.status.as_str())
            .bind(document.file_ref.as_deref())
            .bind(document.updated_at)
            .execute(&mut *self.tx)
            .await
            .context("inserting organizer document")?;
        }

        Ok(())
    }

    async fn update_kyc_status(
        &mut self,
        organizer_id: &str,
        status: KycStatus,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE organizers SET kyc_status = $2, updated_at = now() WHERE id = $1",
        )
        .bind(organizer_id)
        .bind(status.as_str())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Organizer {} not found",
                organizer_id
            )));
        }
        Ok(())
    }

    async fn update_document(
        &mut self,
        organizer_id: &str,
        document: &OrganizerDocument,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE organizer_documents
            SET status = $3, file_ref = $4, updated_at = $5
            WHERE organizer_id = $1 AND doc_type = $2
            "#,
        )
        .bind(organizer_id)
        .bind(&document.doc_type)
        .bind(document.status.as_str())
        .bind(document.file_ref.as_deref())
        .bind(document.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::DocumentNotFound(format!(
                "Organizer {} has no document '{}'",
                organizer_id, document.doc_type
            )));
        }

        sqlx::query("UPDATE organizers SET updated_at = now() WHERE id = $1")
            .bind(organizer_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update_vendor_agreement(
        &mut self,
        organizer_id: &str,
        status: AgreementStatus,
        file_ref: Option<&str>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE organizers
            SET vendor_agreement_status = $2,
                vendor_agreement_ref = COALESCE($3, vendor_agreement_ref),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(organizer_id)
        .bind(status.as_str())
        .bind(file_ref)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Organizer {} not found",
                organizer_id
            )));
        }
        Ok(())
    }

    async fn set_available_credits(
        &mut self,
        organizer_id: &str,
        available: u32,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE organizers SET credits_available = $2, updated_at = now() WHERE id = $1",
        )
        .bind(organizer_id)
        .bind(to_db_count(available)?)
        .execute(&mut *self.tx)
        .await
        .context("updating credit balance")?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Organizer {} not found",
                organizer_id
            )));
        }
        Ok(())
    }

    async fn append_purchase(
        &mut self,
        organizer_id: &str,
        purchase: &LeadPurchase,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO lead_purchases (id, organizer_id, package_id, credits_purchased, price, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&purchase.id)
        .bind(organizer_id)
        .bind(&purchase.package_id)
        .bind(to_db_count(purchase.credits_purchased)?)
        .bind(&purchase.price)
        .bind(purchase.timestamp)
        .execute(&mut *self.tx)
        .await
        .context("appending lead purchase")?;
        Ok(())
    }

    async fn append_unlock(
        &mut self,
        organizer_id: &str,
        unlock: &LeadUnlock,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO lead_unlocks (id, organizer_id, lead_id, cost, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&unlock.id)
        .bind(organizer_id)
        .bind(&unlock.lead_id)
        .bind(to_db_count(unlock.cost)?)
        .bind(unlock.timestamp)
        .execute(&mut *self.tx)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(AppError::AlreadyUnlocked(format!(
                "Lead {} is already unlocked",
                unlock.lead_id
            ))),
            Err(e) => Err(AppError::DatabaseError(e)),
        }
    }

    async fn mark_lead_unlocked(
        &mut self,
        lead_id: &str,
        organizer_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE leads
            SET is_unlocked = true, unlocked_by = $2, unlocked_at = $3
            WHERE id = $1 AND is_unlocked = false
            "#,
        )
        .bind(lead_id)
        .bind(organizer_id)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::AlreadyUnlocked(format!(
                "Lead {} is already unlocked",
                lead_id
            )));
        }
        Ok(())
    }

    async fn insert_trip(&mut self, trip: &Trip) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO trips (id, organizer_id, title, destination, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&trip.id)
        .bind(&trip.organizer_id)
        .bind(&trip.title)
        .bind(trip.destination.as_deref())
        .bind(trip.created_at)
        .execute(&mut *self.tx)
        .await
        .context("inserting trip")?;
        Ok(())
    }

    async fn insert_lead(&mut self, lead: &Lead) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO leads (id, trip_id, name, email, phone, message, is_unlocked, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, false, $7)
            "#,
        )
        .bind(&lead.id)
        .bind(&lead.trip_id)
        .bind(&lead.name)
        .bind(lead.email.as_deref())
        .bind(lead.phone.as_deref())
        .bind(lead.message.as_deref())
        .bind(lead.created_at)
        .execute(&mut *self.tx)
        .await
        .context("inserting lead")?;
        Ok(())
    }

    async fn append_audit(&mut self, entry: &AuditLogEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, actor_id, action, module, details, checksum, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.actor_id)
        .bind(&entry.action)
        .bind(&entry.module)
        .bind(&entry.details)
        .bind(&entry.checksum)
        .bind(entry.timestamp)
        .execute(&mut *self.tx)
        .await
        .context("appending audit entry")?;
        Ok(())
    }

    async fn append_notification(
        &mut self,
        notification: &AdminNotification,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO admin_notifications (id, organizer_id, kind, message, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&notification.id)
        .bind(&notification.organizer_id)
        .bind(&notification.kind)
        .bind(&notification.message)
        .bind(notification.timestamp)
        .execute(&mut *self.tx)
        .await
        .context("appending admin notification")?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let this = *self;
        this.tx.commit().await.context("committing transaction")?;
        Ok(())
    }
}
