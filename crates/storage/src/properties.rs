use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use estate_desk_core::types::{Operation, Property, PropertyKind, PropertyStatus};
use estate_desk_core::Code;

use crate::{clamp_limit, is_unique_violation, to_rfc3339, InsertOutcome};

/// Repository for property listings.
#[derive(Clone)]
pub struct PropertyRepository {
    pool: SqlitePool,
}

impl PropertyRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a new listing. A clash on `code` is reported as [`InsertOutcome::CodeTaken`].
    pub async fn insert(&self, property: &Property) -> Result<InsertOutcome, PropertyError> {
        let result = sqlx::query(
            "INSERT INTO properties \
             (id, code, title, description, kind, operation, status, price, currency, address, \
              city, bedrooms, bathrooms, area_m2, highlighted, created_by, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&property.id)
        .bind(property.code.as_str())
        .bind(&property.title)
        .bind(&property.description)
        .bind(property.kind.as_str())
        .bind(property.operation.as_str())
        .bind(property.status.as_str())
        .bind(property.price)
        .bind(&property.currency)
        .bind(&property.address)
        .bind(&property.city)
        .bind(property.bedrooms.map(i64::from))
        .bind(property.bathrooms.map(i64::from))
        .bind(property.area_m2)
        .bind(i64::from(property.highlighted))
        .bind(&property.created_by)
        .bind(to_rfc3339(property.created_at))
        .bind(to_rfc3339(property.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::CodeTaken),
            Err(err) => Err(PropertyError::Database(err)),
        }
    }

    /// Loads a single listing by id.
    pub async fn fetch(&self, id: &str) -> Result<Property, PropertyError> {
        let row = sqlx::query_as::<_, PropertyRow>(&format!("{SELECT_PROPERTY} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(PropertyError::NotFound)?;
        row.into_domain()
    }

    /// Lists listings, newest first.
    pub async fn list(&self, filter: &PropertyFilter) -> Result<Vec<Property>, PropertyError> {
        let rows = sqlx::query_as::<_, PropertyRow>(&format!(
            "{SELECT_PROPERTY} \
             WHERE (?1 IS NULL OR status = ?1) \
               AND (?2 IS NULL OR highlighted = ?2) \
             ORDER BY created_at DESC, id \
             LIMIT ?3"
        ))
        .bind(filter.status.map(PropertyStatus::as_str))
        .bind(filter.highlighted.map(i64::from))
        .bind(clamp_limit(filter.limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PropertyRow::into_domain).collect()
    }

    /// Persists the mutable fields of a listing.
    ///
    /// `code`, `highlighted` and the creation columns are not written here.
    pub async fn update(&self, property: &Property) -> Result<(), PropertyError> {
        let result = sqlx::query(
            "UPDATE properties \
             SET title = ?, description = ?, kind = ?, operation = ?, status = ?, price = ?, \
                 currency = ?, \
                 address = ?, city = ?, bedrooms = ?, bathrooms = ?, area_m2 = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&property.title)
        .bind(&property.description)
        .bind(property.kind.as_str())
        .bind(property.operation.as_str())
        .bind(property.status.as_str())
        .bind(property.price)
        .bind(&property.currency)
        .bind(&property.address)
        .bind(&property.city)
        .bind(property.bedrooms.map(i64::from))
        .bind(property.bathrooms.map(i64::from))
        .bind(property.area_m2)
        .bind(to_rfc3339(property.updated_at))
        .bind(&property.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PropertyError::NotFound);
        }
        Ok(())
    }

    /// Highlights a listing unless `quota` listings are already highlighted.
    ///
    /// The count and the update run as one statement, so concurrent requests
    /// cannot push the total past `quota`. Returns `false` when the quota is full.
    pub async fn highlight_within(
        &self,
        id: &str,
        quota: u32,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, PropertyError> {
        let result = sqlx::query(
            "UPDATE properties SET highlighted = 1, updated_at = ?1 \
             WHERE id = ?2 AND highlighted = 0 \
               AND (SELECT COUNT(*) FROM properties WHERE highlighted = 1) < ?3",
        )
        .bind(to_rfc3339(updated_at))
        .bind(id)
        .bind(i64::from(quota))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let current: Option<i64> =
            sqlx::query_scalar("SELECT highlighted FROM properties WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        match current {
            None => Err(PropertyError::NotFound),
            Some(flag) => Ok(flag == 1),
        }
    }

    /// Removes the highlight flag from a listing.
    pub async fn clear_highlight(
        &self,
        id: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), PropertyError> {
        let result =
            sqlx::query("UPDATE properties SET highlighted = 0, updated_at = ? WHERE id = ?")
                .bind(to_rfc3339(updated_at))
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(PropertyError::NotFound);
        }
        Ok(())
    }

    /// Counts listings currently highlighted.
    pub async fn count_highlighted(&self) -> Result<u32, PropertyError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM properties WHERE highlighted = 1")
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = row.get("total");
        Ok(total as u32)
    }

    /// Deletes a listing; its code becomes available again.
    pub async fn delete(&self, id: &str) -> Result<(), PropertyError> {
        let result = sqlx::query("DELETE FROM properties WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PropertyError::NotFound);
        }
        Ok(())
    }
}

/// Optional filters for [`PropertyRepository::list`].
#[derive(Debug, Clone, Default)]
pub struct PropertyFilter {
    pub status: Option<PropertyStatus>,
    pub highlighted: Option<bool>,
    pub limit: Option<u32>,
}

/// Errors that can occur while reading or mutating listings.
#[derive(Debug, Error)]
pub enum PropertyError {
    #[error("property not found")]
    NotFound,
    #[error("stored property is corrupt: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

const SELECT_PROPERTY: &str = "SELECT id, code, title, description, kind, operation, status, \
     price, currency, address, city, bedrooms, bathrooms, area_m2, highlighted, \
     created_by, created_at, updated_at \
     FROM properties";

#[derive(Debug, sqlx::FromRow)]
struct PropertyRow {
    id: String,
    code: String,
    title: String,
    description: Option<String>,
    kind: String,
    operation: String,
    status: String,
    price: i64,
    currency: String,
    address: Option<String>,
    city: Option<String>,
    bedrooms: Option<i64>,
    bathrooms: Option<i64>,
    area_m2: Option<f64>,
    highlighted: i64,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PropertyRow {
    fn into_domain(self) -> Result<Property, PropertyError> {
        let corrupt = |field: &str, value: &str| {
            PropertyError::Corrupt(format!("{}: unexpected {field} '{value}'", self.id))
        };
        let code = Code::parse(&self.code).map_err(|_| corrupt("code", &self.code))?;
        let kind = PropertyKind::parse(&self.kind).ok_or_else(|| corrupt("kind", &self.kind))?;
        let operation = Operation::parse(&self.operation)
            .ok_or_else(|| corrupt("operation", &self.operation))?;
        let status =
            PropertyStatus::parse(&self.status).ok_or_else(|| corrupt("status", &self.status))?;

        Ok(Property {
            id: self.id,
            code,
            title: self.title,
            description: self.description,
            kind,
            operation,
            status,
            price: self.price,
            currency: self.currency,
            address: self.address,
            city: self.city,
            bedrooms: self.bedrooms.map(|value| value as u32),
            bathrooms: self.bathrooms.map(|value| value as u32),
            area_m2: self.area_m2,
            highlighted: self.highlighted != 0,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
