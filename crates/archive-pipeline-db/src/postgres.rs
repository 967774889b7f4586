//! PostgreSQL implementation of the repository traits
//!
//! Each logical state transition runs in its own transaction. The blob
//! checksum is written with a conditional `UPDATE ... WHERE sha256 IS NULL`
//! so concurrent writers can never overwrite each other. Entering
//! `VALIDATING` bumps `validation_run`; a terminal write only lands while the
//! row still carries the generation its run started with.

use async_trait::async_trait;
use archive_pipeline_core::{
    Asset, AssetId, AssetsSummary, Blob, BlobId, Checksum, DandisetId, StorageLocation,
    ValidationErrorRecord, ValidationOutcome, ValidationRun, ValidationStatus, Version, VersionId,
    VersionTag,
};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use std::str::FromStr;
use tracing::{debug, instrument};

use crate::error::{DbError, DbResult};
use crate::repository::{AssetRepository, BlobRepository, ChecksumWrite, VersionRepository};

/// PostgreSQL-backed repository for blobs, assets and versions
#[derive(Debug, Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Create a new PostgreSQL repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BlobRepository for PostgresRepository {
    #[instrument(skip(self, blob), fields(blob_id = %blob.id))]
    async fn insert(&self, blob: Blob) -> DbResult<Blob> {
        debug!("Inserting blob");

        sqlx::query(
            r#"
            INSERT INTO blobs (blob_id, location, size, etag, sha256, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(blob.id.as_uuid())
        .bind(Json(&blob.location))
        .bind(size_to_db(blob.size)?)
        .bind(&blob.etag)
        .bind(blob.sha256.as_ref().map(|c| c.value().to_string()))
        .bind(blob.created_at)
        .execute(&self.pool)
        .await?;

        Ok(blob)
    }

    #[instrument(skip(self), fields(blob_id = %id))]
    async fn find_by_id(&self, id: &BlobId) -> DbResult<Option<Blob>> {
        debug!("Finding blob by ID");

        let row = sqlx::query(
            r#"
            SELECT blob_id, location, size, etag, sha256, created_at
            FROM blobs
            WHERE blob_id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_blob).transpose()
    }

    #[instrument(skip(self, checksum), fields(blob_id = %id))]
    async fn set_checksum_if_unset(
        &self,
        id: &BlobId,
        checksum: &Checksum,
    ) -> DbResult<ChecksumWrite> {
        let result = sqlx::query("UPDATE blobs SET sha256 = $2 WHERE blob_id = $1 AND sha256 IS NULL")
            .bind(id.as_uuid())
            .bind(checksum.value())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 1 {
            debug!("Checksum written");
            return Ok(ChecksumWrite::Written);
        }

        let stored: Option<Option<String>> =
            sqlx::query_scalar("SELECT sha256 FROM blobs WHERE blob_id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        match stored {
            None => Err(DbError::NotFound(format!("blob {}", id))),
            Some(None) => Err(DbError::Transaction(format!(
                "checksum of blob {} still unset after conditional update",
                id
            ))),
            Some(Some(existing)) => {
                let existing = Checksum::sha256(existing)?;
                if existing.verify(checksum) {
                    Ok(ChecksumWrite::Unchanged)
                } else {
                    Ok(ChecksumWrite::Conflict(existing))
                }
            }
        }
    }

    async fn health_check(&self) -> DbResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| DbError::Connection(format!("Health check failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl AssetRepository for PostgresRepository {
    #[instrument(skip(self, asset), fields(asset_id = %asset.id, path = %asset.path))]
    async fn insert(&self, asset: Asset) -> DbResult<Asset> {
        debug!("Inserting asset");

        sqlx::query(
            r#"
            INSERT INTO assets (
                id, path, blob_id, metadata, status, validation_errors, validation_run,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(asset.id.to_string())
        .bind(&asset.path)
        .bind(asset.blob_id.as_uuid())
        .bind(&asset.metadata)
        .bind(asset.status.as_str())
        .bind(Json(&asset.validation_errors))
        .bind(run_to_db(asset.validation_run)?)
        .bind(asset.created_at)
        .bind(asset.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(asset)
    }

    #[instrument(skip(self), fields(asset_id = %id))]
    async fn find_by_id(&self, id: &AssetId) -> DbResult<Option<Asset>> {
        debug!("Finding asset by ID");

        let row = sqlx::query(
            r#"
            SELECT id, path, blob_id, metadata, status, validation_errors, validation_run,
                   created_at, updated_at
            FROM assets
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_asset).transpose()
    }

    #[instrument(skip(self), fields(blob_id = %blob_id))]
    async fn list_ids_by_blob(&self, blob_id: &BlobId) -> DbResult<Vec<AssetId>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM assets WHERE blob_id = $1 ORDER BY id")
                .bind(blob_id.as_uuid())
                .fetch_all(&self.pool)
                .await?;

        debug!(count = ids.len(), "Listed assets referencing blob");
        ids.iter().map(|s| parse_asset_id(s)).collect()
    }

    #[instrument(skip(self), fields(asset_id = %id))]
    async fn mark_validating(&self, id: &AssetId) -> DbResult<ValidationRun> {
        let run = begin_run(&self.pool, "assets", &id.to_string()).await?;
        debug!(run = %run, "Asset marked VALIDATING");
        Ok(run)
    }

    #[instrument(skip(self, outcome), fields(asset_id = %id, run = %run, status = %outcome.status()))]
    async fn record_validation(
        &self,
        id: &AssetId,
        run: ValidationRun,
        outcome: &ValidationOutcome,
    ) -> DbResult<bool> {
        record_run(&self.pool, "assets", &id.to_string(), run, outcome).await
    }

    #[instrument(skip(self))]
    async fn claim_stale_validating(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<AssetId>> {
        let ids = claim_stale(&self.pool, "assets", cutoff, now).await?;
        ids.iter().map(|s| parse_asset_id(s)).collect()
    }
}

#[async_trait]
impl VersionRepository for PostgresRepository {
    #[instrument(skip(self, version), fields(version_id = %version.id, dandiset = %version.dandiset_id))]
    async fn insert(&self, version: Version) -> DbResult<Version> {
        debug!("Inserting version");

        sqlx::query(
            r#"
            INSERT INTO versions (
                id, dandiset_id, version, name, metadata, status, validation_errors,
                validation_run, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(version.id.to_string())
        .bind(version.dandiset_id.value() as i32)
        .bind(version.version.as_str())
        .bind(&version.name)
        .bind(&version.metadata)
        .bind(version.status.as_str())
        .bind(Json(&version.validation_errors))
        .bind(run_to_db(version.validation_run)?)
        .bind(version.created_at)
        .bind(version.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(version)
    }

    #[instrument(skip(self), fields(version_id = %version_id, asset_id = %asset_id))]
    async fn add_asset(&self, version_id: &VersionId, asset_id: &AssetId) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO version_assets (version_id, asset_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(version_id.to_string())
        .bind(asset_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(version_id = %id))]
    async fn find_by_id(&self, id: &VersionId) -> DbResult<Option<Version>> {
        debug!("Finding version by ID");

        let row = sqlx::query(
            r#"
            SELECT id, dandiset_id, version, name, metadata, status, validation_errors,
                   validation_run, created_at, updated_at
            FROM versions
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_version).transpose()
    }

    #[instrument(skip(self), fields(version_id = %id))]
    async fn asset_summary(&self, id: &VersionId) -> DbResult<AssetsSummary> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(a.id) AS files, COALESCE(SUM(b.size), 0)::BIGINT AS bytes
            FROM version_assets va
            JOIN assets a ON a.id = va.asset_id
            JOIN blobs b ON b.blob_id = a.blob_id
            WHERE va.version_id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_one(&self.pool)
        .await?;

        let files: i64 = row.try_get("files")?;
        let bytes: i64 = row.try_get("bytes")?;
        Ok(AssetsSummary {
            number_of_files: files.max(0) as u64,
            number_of_bytes: bytes.max(0) as u64,
        })
    }

    #[instrument(skip(self), fields(version_id = %id))]
    async fn mark_validating(&self, id: &VersionId) -> DbResult<ValidationRun> {
        let run = begin_run(&self.pool, "versions", &id.to_string()).await?;
        debug!(run = %run, "Version marked VALIDATING");
        Ok(run)
    }

    #[instrument(skip(self, outcome), fields(version_id = %id, run = %run, status = %outcome.status()))]
    async fn record_validation(
        &self,
        id: &VersionId,
        run: ValidationRun,
        outcome: &ValidationOutcome,
    ) -> DbResult<bool> {
        record_run(&self.pool, "versions", &id.to_string(), run, outcome).await
    }

    #[instrument(skip(self))]
    async fn claim_stale_validating(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<VersionId>> {
        let ids = claim_stale(&self.pool, "versions", cutoff, now).await?;
        ids.iter()
            .map(|s| {
                VersionId::from_str(s)
                    .map_err(|e| DbError::InvalidData(format!("Invalid version ID: {}", e)))
            })
            .collect()
    }
}

// `table` is always one of our own table names, never user input.

/// Lock the row and return its status and run generation
async fn lock_run(
    tx: &mut Transaction<'_, Postgres>,
    table: &'static str,
    id: &str,
) -> DbResult<(ValidationStatus, ValidationRun)> {
    let query = format!(
        "SELECT status, validation_run FROM {} WHERE id = $1 FOR UPDATE",
        table
    );
    let row = sqlx::query(&query)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("{} row {}", table, id)))?;

    let status: String = row.try_get("status")?;
    let run: i64 = row.try_get("validation_run")?;
    Ok((parse_status(&status)?, run_from_db(run)?))
}

/// Enter `VALIDATING` with the next run generation
async fn begin_run(pool: &PgPool, table: &'static str, id: &str) -> DbResult<ValidationRun> {
    let mut tx = pool.begin().await?;
    let (current, run) = lock_run(&mut tx, table, id).await?;
    current.transition(ValidationStatus::Validating)?;
    let next = run.next();

    let query = format!(
        "UPDATE {} SET status = $2, validation_run = $3, updated_at = NOW() WHERE id = $1",
        table
    );
    sqlx::query(&query)
        .bind(id)
        .bind(ValidationStatus::Validating.as_str())
        .bind(run_to_db(next)?)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(next)
}

/// Write the terminal outcome of `run` unless a later run took over
async fn record_run(
    pool: &PgPool,
    table: &'static str,
    id: &str,
    run: ValidationRun,
    outcome: &ValidationOutcome,
) -> DbResult<bool> {
    let mut tx = pool.begin().await?;
    let (current, stored_run) = lock_run(&mut tx, table, id).await?;

    if stored_run != run {
        tx.rollback().await?;
        debug!(current = %stored_run, "Superseded run, outcome dropped");
        return Ok(false);
    }
    current.transition(outcome.status())?;

    let query = format!(
        "UPDATE {} SET status = $2, validation_errors = $3, updated_at = NOW() WHERE id = $1",
        table
    );
    sqlx::query(&query)
        .bind(id)
        .bind(outcome.status().as_str())
        .bind(Json(outcome.errors()))
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    debug!(errors = outcome.errors().len(), "Validation recorded");
    Ok(true)
}

/// Stamp and return rows stuck in `VALIDATING` since before `cutoff`
async fn claim_stale(
    pool: &PgPool,
    table: &'static str,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DbResult<Vec<String>> {
    let query = format!(
        "UPDATE {} SET updated_at = $2 WHERE status = 'VALIDATING' AND updated_at < $1 RETURNING id",
        table
    );
    let ids: Vec<String> = sqlx::query_scalar(&query)
        .bind(cutoff)
        .bind(now)
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

fn run_to_db(run: ValidationRun) -> DbResult<i64> {
    i64::try_from(run.value())
        .map_err(|_| DbError::InvalidData(format!("Validation run {} out of range", run)))
}

fn run_from_db(run: i64) -> DbResult<ValidationRun> {
    u64::try_from(run)
        .map(ValidationRun::new)
        .map_err(|_| DbError::InvalidData(format!("Negative validation run: {}", run)))
}

fn size_to_db(size: u64) -> DbResult<i64> {
    i64::try_from(size).map_err(|_| DbError::InvalidData(format!("Blob size {} out of range", size)))
}

fn parse_status(s: &str) -> DbResult<ValidationStatus> {
    ValidationStatus::from_str(s).map_err(DbError::InvalidData)
}

fn parse_asset_id(s: &str) -> DbResult<AssetId> {
    AssetId::from_str(s).map_err(|e| DbError::InvalidData(format!("Invalid asset ID: {}", e)))
}

fn row_to_blob(row: PgRow) -> DbResult<Blob> {
    let id: uuid::Uuid = row.try_get("blob_id")?;
    let location: Json<StorageLocation> = row.try_get("location")?;
    let size: i64 = row.try_get("size")?;
    let sha256: Option<String> = row.try_get("sha256")?;

    Ok(Blob {
        id: BlobId::from_uuid(id),
        location: location.0,
        size: u64::try_from(size)
            .map_err(|_| DbError::InvalidData(format!("Negative blob size: {}", size)))?,
        etag: row.try_get("etag")?,
        sha256: sha256.map(Checksum::sha256).transpose()?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_asset(row: PgRow) -> DbResult<Asset> {
    let id: String = row.try_get("id")?;
    let blob_id: uuid::Uuid = row.try_get("blob_id")?;
    let status: String = row.try_get("status")?;
    let errors: Json<Vec<ValidationErrorRecord>> = row.try_get("validation_errors")?;
    let metadata: JsonValue = row.try_get("metadata")?;

    Ok(Asset {
        id: parse_asset_id(&id)?,
        path: row.try_get("path")?,
        blob_id: BlobId::from_uuid(blob_id),
        metadata,
        status: parse_status(&status)?,
        validation_errors: errors.0,
        validation_run: run_from_db(row.try_get("validation_run")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_version(row: PgRow) -> DbResult<Version> {
    let id: String = row.try_get("id")?;
    let dandiset_id: i32 = row.try_get("dandiset_id")?;
    let version: String = row.try_get("version")?;
    let status: String = row.try_get("status")?;
    let errors: Json<Vec<ValidationErrorRecord>> = row.try_get("validation_errors")?;
    let metadata: JsonValue = row.try_get("metadata")?;

    let dandiset_id = u32::try_from(dandiset_id)
        .map_err(|_| DbError::InvalidData(format!("Invalid dandiset ID: {}", dandiset_id)))
        .and_then(|v| DandisetId::new(v).map_err(DbError::from))?;

    Ok(Version {
        id: VersionId::from_str(&id)
            .map_err(|e| DbError::InvalidData(format!("Invalid version ID: {}", e)))?,
        dandiset_id,
        version: VersionTag::parse(&version)?,
        name: row.try_get("name")?,
        metadata,
        status: parse_status(&status)?,
        validation_errors: errors.0,
        validation_run: run_from_db(row.try_get("validation_run")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
