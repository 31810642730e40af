//! Lookup cache keyed by a content hash of the request

use serde_json::Value as Json;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use super::client::ApiResponse;
use crate::error::{Error, Result};

/// Cache key of a request: SHA-256 over the URL and its parameters, hex-encoded
pub fn cache_key(url: &str, params: &[(String, String)]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    for (name, value) in params {
        hasher.update(b"_");
        hasher.update(name.as_bytes());
        hasher.update(b"_");
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Lookup responses stored in the `lookup_cache` table
#[derive(Debug, Clone)]
pub struct SqliteLookupCache {
    pool: SqlitePool,
}

impl SqliteLookupCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &str) -> Result<Option<ApiResponse>> {
        let row: Option<(Option<i64>, Option<String>)> =
            sqlx::query_as("SELECT status, data FROM lookup_cache WHERE cache_key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        let Some((status, data)) = row else {
            return Ok(None);
        };
        let data = data
            .map(|body| serde_json::from_str::<Json>(&body))
            .transpose()
            .map_err(|e| Error::Parse(format!("Invalid cached lookup {}: {}", key, e)))?;

        Ok(Some(ApiResponse {
            status: status.and_then(|s| u16::try_from(s).ok()).unwrap_or(0),
            data,
        }))
    }

    pub async fn put(&self, key: &str, url: &str, response: &ApiResponse) -> Result<()> {
        let data = response
            .data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| Error::Parse(format!("Failed to serialize lookup response: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO lookup_cache (cache_key, url, success, status, data)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(cache_key) DO UPDATE SET
                success = excluded.success,
                status = excluded.status,
                data = excluded.data
            "#,
        )
        .bind(key)
        .bind(url)
        .bind(response.is_success())
        .bind(i64::from(response.status))
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM lookup_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn clear(&self) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM lookup_cache").execute(&self.pool).await?;
        Ok(removed.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::run_migrations;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        pool
    }

    #[test]
    fn test_cache_key() {
        let params = vec![("doi".to_string(), "10.1/x".to_string())];
        let key = cache_key("http://glutton/lookup", &params);
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, cache_key("http://glutton/lookup", &params));
        assert_ne!(key, cache_key("http://glutton/lookup", &[]));
        assert_ne!(
            key,
            cache_key("http://glutton/lookup", &[("pmid".to_string(), "10.1/x".to_string())])
        );
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let cache = SqliteLookupCache::new(setup_test_db().await);
        assert!(cache.get("k1").await.unwrap().is_none());

        cache
            .put("k1", "http://a", &ApiResponse::ok(json!({"title": "T"})))
            .await
            .unwrap();
        cache.put("k2", "http://b", &ApiResponse::failed(404)).await.unwrap();

        let hit = cache.get("k1").await.unwrap().unwrap();
        assert!(hit.is_success());
        assert_eq!(hit.data.unwrap()["title"], "T");

        let miss = cache.get("k2").await.unwrap().unwrap();
        assert_eq!(miss.status, 404);
        assert!(!miss.is_success());

        assert_eq!(cache.count().await.unwrap(), 2);
        assert_eq!(cache.clear().await.unwrap(), 2);
    }
}
