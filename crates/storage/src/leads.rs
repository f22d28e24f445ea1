use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use thiserror::Error;

use estate_desk_core::types::{Lead, LeadSource, LeadStatus};
use estate_desk_core::Code;

use crate::{clamp_limit, is_foreign_key_violation, is_unique_violation, to_rfc3339, InsertOutcome};

/// Repository for sales leads.
#[derive(Clone)]
pub struct LeadRepository {
    pool: SqlitePool,
}

impl LeadRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a new lead. A clash on `code` is reported as [`InsertOutcome::CodeTaken`].
    pub async fn insert(&self, lead: &Lead) -> Result<InsertOutcome, LeadError> {
        let result = sqlx::query(
            "INSERT INTO leads \
             (id, code, name, email, phone, source, status, property_id, notes, \
              last_contacted_at, follow_up_on, created_by, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&lead.id)
        .bind(lead.code.as_str())
        .bind(&lead.name)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(lead.source.as_str())
        .bind(lead.status.as_str())
        .bind(&lead.property_id)
        .bind(&lead.notes)
        .bind(lead.last_contacted_at.map(to_rfc3339))
        .bind(lead.follow_up_on)
        .bind(&lead.created_by)
        .bind(to_rfc3339(lead.created_at))
        .bind(to_rfc3339(lead.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::CodeTaken),
            Err(err) if is_foreign_key_violation(&err) => Err(LeadError::UnknownProperty),
            Err(err) => Err(LeadError::Database(err)),
        }
    }

    /// Loads a single lead by id.
    pub async fn fetch(&self, id: &str) -> Result<Lead, LeadError> {
        let row = sqlx::query_as::<_, LeadRow>(&format!("{SELECT_LEAD} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LeadError::NotFound)?;
        row.into_domain()
    }

    /// Lists leads, newest first.
    pub async fn list(&self, filter: &LeadFilter) -> Result<Vec<Lead>, LeadError> {
        let rows = sqlx::query_as::<_, LeadRow>(&format!(
            "{SELECT_LEAD} \
             WHERE (?1 IS NULL OR status = ?1) \
               AND (?2 IS NULL OR property_id = ?2) \
             ORDER BY created_at DESC, id \
             LIMIT ?3"
        ))
        .bind(filter.status.map(LeadStatus::as_str))
        .bind(filter.property_id.as_deref())
        .bind(clamp_limit(filter.limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LeadRow::into_domain).collect()
    }

    /// Lists open leads whose follow-up date falls before `cutoff`, oldest first.
    pub async fn list_overdue(
        &self,
        cutoff: NaiveDate,
        limit: Option<u32>,
    ) -> Result<Vec<Lead>, LeadError> {
        let rows = sqlx::query_as::<_, LeadRow>(&format!(
            "{SELECT_LEAD} \
             WHERE status NOT IN ('won', 'lost') \
               AND follow_up_on IS NOT NULL \
               AND follow_up_on < ? \
             ORDER BY follow_up_on ASC, created_at ASC \
             LIMIT ?"
        ))
        .bind(cutoff)
        .bind(clamp_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LeadRow::into_domain).collect()
    }

    /// Persists the mutable fields of a lead. `code` is never written.
    pub async fn update(&self, lead: &Lead) -> Result<(), LeadError> {
        let result = sqlx::query(
            "UPDATE leads \
             SET name = ?, email = ?, phone = ?, source = ?, status = ?, property_id = ?, \
                 notes = ?, \
                 last_contacted_at = ?, follow_up_on = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&lead.name)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(lead.source.as_str())
        .bind(lead.status.as_str())
        .bind(&lead.property_id)
        .bind(&lead.notes)
        .bind(lead.last_contacted_at.map(to_rfc3339))
        .bind(lead.follow_up_on)
        .bind(to_rfc3339(lead.updated_at))
        .bind(&lead.id)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_foreign_key_violation(&err) {
                LeadError::UnknownProperty
            } else {
                LeadError::Database(err)
            }
        })?;

        if result.rows_affected() == 0 {
            return Err(LeadError::NotFound);
        }
        Ok(())
    }

    /// Deletes a lead; its code becomes available again.
    pub async fn delete(&self, id: &str) -> Result<(), LeadError> {
        let result = sqlx::query("DELETE FROM leads WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LeadError::NotFound);
        }
        Ok(())
    }
}

/// Optional filters for [`LeadRepository::list`].
#[derive(Debug, Clone, Default)]
pub struct LeadFilter {
    pub status: Option<LeadStatus>,
    pub property_id: Option<String>,
    pub limit: Option<u32>,
}

/// Errors that can occur while reading or mutating leads.
#[derive(Debug, Error)]
pub enum LeadError {
    #[error("lead not found")]
    NotFound,
    #[error("referenced property does not exist")]
    UnknownProperty,
    #[error("stored lead is corrupt: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

const SELECT_LEAD: &str = "SELECT id, code, name, email, phone, source, status, property_id, \
     notes, last_contacted_at, follow_up_on, created_by, created_at, updated_at \
     FROM leads";

#[derive(Debug, sqlx::FromRow)]
struct LeadRow {
    id: String,
    code: String,
    name: String,
    email: Option<String>,
    phone: Option<String>,
    source: String,
    status: String,
    property_id: Option<String>,
    notes: Option<String>,
    last_contacted_at: Option<DateTime<Utc>>,
    follow_up_on: Option<NaiveDate>,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl LeadRow {
    fn into_domain(self) -> Result<Lead, LeadError> {
        let corrupt = |field: &str, value: &str| {
            LeadError::Corrupt(format!("{}: unexpected {field} '{value}'", self.id))
        };
        let code = Code::parse(&self.code).map_err(|_| corrupt("code", &self.code))?;
        let source =
            LeadSource::parse(&self.source).ok_or_else(|| corrupt("source", &self.source))?;
        let status =
            LeadStatus::parse(&self.status).ok_or_else(|| corrupt("status", &self.status))?;

        Ok(Lead {
            id: self.id,
            code,
            name: self.name,
            email: self.email,
            phone: self.phone,
            source,
            status,
            property_id: self.property_id,
            notes: self.notes,
            last_contacted_at: self.last_contacted_at,
            follow_up_on: self.follow_up_on,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
