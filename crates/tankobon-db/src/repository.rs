//! Series, volume and publisher persistence for PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use tankobon_core::error::AppError;
use tankobon_core::models::{
    DatabaseStats, NewSeries, NewVolume, SeriesRecord, SeriesStatus, SeriesVolumeSummary,
    VolumeRecord,
};
use tankobon_core::ports::{PublisherDirectory, SeriesStore, VolumeStore};
use tracing::debug;

/// Column list for series SELECT queries. Must remain a const literal since
/// format!() bypasses sqlx compile-time validation.
const SERIES_RECORD_COLUMNS: &str = "s.id, s.external_id, s.title_romaji, s.title_english, s.authors, s.status, s.total_volumes, s.popularity, s.last_checked_for_volumes";

/// Statuses the update pass revisits, in their stored spelling.
fn trackable_statuses() -> Vec<String> {
    [
        SeriesStatus::Releasing,
        SeriesStatus::Finished,
        SeriesStatus::Cancelled,
    ]
    .iter()
    .map(|s| s.as_str().to_string())
    .collect()
}

/// Repository over the `series`, `volumes` and `publishers` tables.
///
/// # Examples
///
/// ```no_run
/// use sqlx::postgres::PgPoolOptions;
/// use tankobon_db::CatalogRepository;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = PgPoolOptions::new()
///     .max_connections(5)
///     .connect("postgresql://localhost/tankobon")
///     .await?;
///
/// let repo = CatalogRepository::new(pool);
/// let stats = repo.get_stats().await?;
/// println!("{} series stored", stats.total_series);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CatalogRepository {
    pool: Pool<Postgres>,
}

impl CatalogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns aggregated store statistics.
    pub async fn get_stats(&self) -> Result<DatabaseStats, AppError> {
        let row: StatsRow = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM series) AS total_series,
                (SELECT COUNT(*) FROM volumes) AS total_volumes,
                (SELECT COUNT(*) FROM publishers) AS trusted_publishers,
                (SELECT MAX(last_checked_for_volumes) FROM series) AS last_volume_check
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(DatabaseStats {
            total_series: row.total_series.unwrap_or(0),
            total_volumes: row.total_volumes.unwrap_or(0),
            trusted_publishers: row.trusted_publishers.unwrap_or(0),
            last_volume_check: row.last_volume_check,
        })
    }
}

#[async_trait]
impl SeriesStore for CatalogRepository {
    async fn find_series_id(&self, external_id: i64) -> Result<Option<i64>, AppError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM series WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(row.map(|r| r.0))
    }

    async fn count_series(&self) -> Result<i64, AppError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM series")
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(row.0)
    }

    async fn insert_series(&self, series: &NewSeries) -> Result<i64, AppError> {
        let rec: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO series (
                external_id, title_romaji, title_english, title_native,
                description, authors, artists, genres, tags,
                start_date, end_date, status, country_of_origin,
                total_volumes, total_chapters, average_score, mean_score,
                is_adult, popularity, cover_image_url, cover_image_key,
                site_url, adaptations
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23
            )
            RETURNING id
            "#,
        )
        .bind(series.external_id)
        .bind(&series.title_romaji)
        .bind(&series.title_english)
        .bind(&series.title_native)
        .bind(&series.description)
        .bind(&series.authors)
        .bind(&series.artists)
        .bind(&series.genres)
        .bind(&series.tags)
        .bind(series.start_date)
        .bind(series.end_date)
        .bind(series.status.as_str())
        .bind(&series.country_of_origin)
        .bind(series.total_volumes)
        .bind(series.total_chapters)
        .bind(series.average_score)
        .bind(series.mean_score)
        .bind(series.is_adult)
        .bind(series.popularity)
        .bind(&series.cover_image_url)
        .bind(&series.cover_image_key)
        .bind(&series.site_url)
        .bind(Json(&series.adaptations))
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        debug!(series_id = rec.0, external_id = series.external_id, "Series inserted");
        Ok(rec.0)
    }

    /// Refreshes the catalog-sourced fields. A stored cover key is kept
    /// unless a new one is supplied.
    async fn update_series(&self, id: i64, series: &NewSeries) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE series SET
                title_romaji = $2,
                title_english = $3,
                title_native = $4,
                description = $5,
                authors = $6,
                artists = $7,
                genres = $8,
                tags = $9,
                start_date = $10,
                end_date = $11,
                status = $12,
                total_volumes = $13,
                total_chapters = $14,
                average_score = $15,
                mean_score = $16,
                popularity = $17,
                cover_image_url = $18,
                cover_image_key = COALESCE($19, cover_image_key),
                site_url = $20,
                adaptations = $21,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&series.title_romaji)
        .bind(&series.title_english)
        .bind(&series.title_native)
        .bind(&series.description)
        .bind(&series.authors)
        .bind(&series.artists)
        .bind(&series.genres)
        .bind(&series.tags)
        .bind(series.start_date)
        .bind(series.end_date)
        .bind(series.status.as_str())
        .bind(series.total_volumes)
        .bind(series.total_chapters)
        .bind(series.average_score)
        .bind(series.mean_score)
        .bind(series.popularity)
        .bind(&series.cover_image_url)
        .bind(&series.cover_image_key)
        .bind(&series.site_url)
        .bind(Json(&series.adaptations))
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(())
    }

    async fn series_due_for_volume_check(
        &self,
        top_n: i64,
        checked_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SeriesRecord>, AppError> {
        let query = format!(
            r#"
            WITH top_series AS (
                SELECT id
                FROM series
                ORDER BY popularity DESC NULLS LAST
                LIMIT $1
            )
            SELECT {}
            FROM series s
            INNER JOIN top_series t ON s.id = t.id
            WHERE (s.last_checked_for_volumes IS NULL OR s.last_checked_for_volumes < $2)
              AND s.status = ANY($3)
            ORDER BY
                CASE
                    WHEN s.status = 'RELEASING' THEN 1
                    WHEN s.last_checked_for_volumes IS NULL THEN 2
                    ELSE 3
                END,
                s.popularity DESC NULLS LAST
            LIMIT $4
            "#,
            SERIES_RECORD_COLUMNS
        );

        sqlx::query_as::<_, SeriesRecord>(&query)
            .bind(top_n)
            .bind(checked_before)
            .bind(trackable_statuses())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }

    async fn mark_volumes_checked(&self, series_id: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE series SET last_checked_for_volumes = NOW() WHERE id = $1")
            .bind(series_id)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(())
    }
}

#[async_trait]
impl VolumeStore for CatalogRepository {
    async fn volume_exists(&self, series_id: i64, isbn_13: &str) -> Result<bool, AppError> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM volumes WHERE series_id = $1 AND isbn_13 = $2)",
        )
        .bind(series_id)
        .bind(isbn_13)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        Ok(row.0)
    }

    async fn insert_volume(&self, series_id: i64, volume: &NewVolume) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO volumes (
                series_id, title, subtitle, volume_number, isbn_13, isbn_10,
                page_count, publisher, published_date, description,
                language, categories, price_amount, price_currency,
                country, preview_link, info_link, thumbnail_url, thumbnail_key
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19
            )
            ON CONFLICT (series_id, isbn_13) DO NOTHING
            "#,
        )
        .bind(series_id)
        .bind(&volume.title)
        .bind(&volume.subtitle)
        .bind(volume.volume_number)
        .bind(&volume.isbn_13)
        .bind(&volume.isbn_10)
        .bind(volume.page_count)
        .bind(&volume.publisher)
        .bind(volume.published_date)
        .bind(&volume.description)
        .bind(&volume.language)
        .bind(&volume.categories)
        .bind(volume.price_amount)
        .bind(&volume.price_currency)
        .bind(&volume.country)
        .bind(&volume.preview_link)
        .bind(&volume.info_link)
        .bind(&volume.thumbnail_url)
        .bind(&volume.thumbnail_key)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(result.rows_affected() > 0)
    }

    async fn series_with_volumes(
        &self,
        min_volumes: i64,
    ) -> Result<Vec<SeriesVolumeSummary>, AppError> {
        sqlx::query_as::<_, SeriesVolumeSummary>(
            r#"
            SELECT
                s.id,
                COALESCE(s.title_english, s.title_romaji, '') AS title,
                COUNT(v.id) AS volume_count
            FROM series s
            INNER JOIN volumes v ON s.id = v.series_id
            GROUP BY s.id
            HAVING COUNT(v.id) >= $1
            ORDER BY COUNT(v.id) DESC, s.id
            "#,
        )
        .bind(min_volumes)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    async fn volumes_for_series(&self, series_id: i64) -> Result<Vec<VolumeRecord>, AppError> {
        sqlx::query_as::<_, VolumeRecord>(
            r#"
            SELECT id, series_id, title, publisher, isbn_13, volume_number, thumbnail_key
            FROM volumes
            WHERE series_id = $1
            ORDER BY volume_number NULLS LAST, published_date, id
            "#,
        )
        .bind(series_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    async fn delete_volumes(&self, ids: &[i64]) -> Result<u64, AppError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(AppError::DatabaseError)?;
        let result = sqlx::query("DELETE FROM volumes WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .execute(&mut *tx)
            .await
            .map_err(AppError::DatabaseError)?;
        tx.commit().await.map_err(AppError::DatabaseError)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PublisherDirectory for CatalogRepository {
    async fn trusted_publishers(&self) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM publishers ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}

/// Helper struct for deserializing stats query results
#[derive(sqlx::FromRow)]
struct StatsRow {
    total_series: Option<i64>,
    total_volumes: Option<i64>,
    trusted_publishers: Option<i64>,
    last_volume_check: Option<DateTime<Utc>>,
}
