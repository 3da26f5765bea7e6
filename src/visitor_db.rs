pub mod rest;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use thiserror::Error;
use tracing::debug;

use crate::{auth::StoreSession, error::LookupError, geo::GeoData};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store answered {0}: {1}")]
    Status(u16, String),
    #[error("expected exactly one row, got {0}")]
    RowCount(usize),
}

#[derive(FromRow, Deserialize, Debug, Clone, PartialEq)]
pub struct DomainRow {
    id: i64,
}

impl DomainRow {
    #[cfg(test)]
    pub fn new(id: i64) -> Self {
        Self { id }
    }
    pub fn id(&self) -> i64 {
        self.id
    }
}

/// A visitor record as stored, including the id the store assigned to it
#[derive(FromRow, Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct VisitorRow {
    pub id: i64,
    pub domain_id: i64,
    pub ip: String,
    pub visited_at: DateTime<Utc>,
    pub continent: Option<String>,
    pub country: Option<String>,
    pub country_iso: Option<String>,
    pub is_eu: Option<bool>,
    pub city: Option<String>,
    pub subdivisions: Vec<Option<String>>,
}

/// Column values for a visitor row that doesn't exist yet
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct NewVisitor {
    pub domain_id: i64,
    pub ip: String,
    pub visited_at: DateTime<Utc>,
    pub continent: Option<String>,
    pub country: Option<String>,
    pub country_iso: Option<String>,
    pub is_eu: Option<bool>,
    pub city: Option<String>,
    pub subdivisions: Vec<Option<String>>,
}

impl NewVisitor {
    pub fn new(domain_id: i64, ip: &str, geo: &GeoData, visited_at: DateTime<Utc>) -> Self {
        Self {
            domain_id,
            ip: ip.to_string(),
            visited_at,
            continent: geo.continent_name(),
            country: geo.country_name(),
            country_iso: geo.country_iso(),
            is_eu: geo.is_eu(),
            city: geo.city_name(),
            subdivisions: geo.subdivision_names(),
        }
    }
}

/// Where domains are looked up and visitors are written. Every call carries the caller's
/// session so the store can apply its own access rules.
#[async_trait]
pub trait VisitorStore: Send + Sync {
    /// Domains whose name equals `domain`. Implementations may stop after two rows.
    async fn find_domains(
        &self,
        session: &StoreSession,
        domain: &str,
    ) -> Result<Vec<DomainRow>, StoreError>;

    /// Inserts a single visitor and returns the stored row.
    async fn insert_visitor(
        &self,
        session: &StoreSession,
        visitor: &NewVisitor,
    ) -> Result<VisitorRow, StoreError>;
}

/// Picks the only domain row out of a lookup result.
pub fn single_domain(mut rows: Vec<DomainRow>, domain: &str) -> Result<DomainRow, LookupError> {
    match rows.len() {
        0 => Err(LookupError::NotFound(domain.to_string())),
        1 => Ok(rows.remove(0)),
        n => Err(LookupError::Ambiguous(domain.to_string(), n)),
    }
}

/// Visitor store backed directly by PostgreSQL
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a transaction with the caller's headers exposed as `request.headers`, the same
    /// setting PostgREST provides to row level security policies.
    async fn begin_session(
        &self,
        session: &StoreSession,
    ) -> Result<Transaction<'_, Postgres>, sqlx::Error> {
        let mut transaction = self.pool.begin().await?;
        let headers = json!({ "authorization": session.authorization() }).to_string();

        sqlx::query("SELECT set_config('request.headers', $1, true)")
            .bind(headers)
            .execute(&mut *transaction)
            .await?;

        Ok(transaction)
    }
}

#[async_trait]
impl VisitorStore for PgStore {
    async fn find_domains(
        &self,
        session: &StoreSession,
        domain: &str,
    ) -> Result<Vec<DomainRow>, StoreError> {
        let mut transaction = self.begin_session(session).await?;

        let rows: Vec<DomainRow> = sqlx::query_as("SELECT id FROM domains WHERE domain = $1 LIMIT 2")
            .bind(domain)
            .fetch_all(&mut *transaction)
            .await?;

        transaction.commit().await?;
        debug!(domain, matches = rows.len(), "Looked up domain");
        Ok(rows)
    }

    async fn insert_visitor(
        &self,
        session: &StoreSession,
        visitor: &NewVisitor,
    ) -> Result<VisitorRow, StoreError> {
        let mut transaction = self.begin_session(session).await?;

        let row: VisitorRow = sqlx::query_as(
            "INSERT INTO visitors
                (domain_id, ip, visited_at, continent, country, country_iso, is_eu, city, subdivisions)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *",
        )
        .bind(visitor.domain_id)
        .bind(&visitor.ip)
        .bind(visitor.visited_at)
        .bind(&visitor.continent)
        .bind(&visitor.country)
        .bind(&visitor.country_iso)
        .bind(visitor.is_eu)
        .bind(&visitor.city)
        .bind(visitor.subdivisions.clone())
        .fetch_one(&mut *transaction)
        .await?;

        transaction.commit().await?;
        Ok(row)
    }
}
