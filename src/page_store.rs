//! Page-content cache.
//!
//! Maps a route key to the text last extracted from it. Rows are replaced
//! wholesale on every scan, so concurrent scans of the same key simply keep
//! whichever finished last.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::models::PageEntry;

#[derive(Clone)]
pub struct PageStore {
    pool: SqlitePool,
}

impl PageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Stores `text` under `key`. Returns `true` when the text differs from
    /// what was cached before (or nothing was cached).
    pub async fn update_page_content(&self, key: &str, text: &str) -> Result<bool> {
        let digest = digest(text);

        let previous: Option<String> = sqlx::query_scalar("SELECT digest FROM pages WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO pages (key, text, digest, scanned_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                text = excluded.text,
                digest = excluded.digest,
                scanned_at = excluded.scanned_at
            "#,
        )
        .bind(key)
        .bind(text)
        .bind(&digest)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(previous.as_deref() != Some(digest.as_str()))
    }

    /// All cached pages, ordered by key.
    pub async fn page_map(&self) -> Result<Vec<PageEntry>> {
        let rows = sqlx::query("SELECT key, text, digest, scanned_at FROM pages ORDER BY key ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let scanned_at: i64 = row.get("scanned_at");
                PageEntry {
                    key: row.get("key"),
                    text: row.get("text"),
                    digest: row.get("digest"),
                    scanned_at: Utc
                        .timestamp_opt(scanned_at, 0)
                        .single()
                        .unwrap_or_default(),
                }
            })
            .collect())
    }

    /// Concatenates every cached page into one context string.
    ///
    /// Load failures are logged and treated as an empty cache.
    pub async fn get_combined_context(&self) -> String {
        match self.page_map().await {
            Ok(pages) => combine_pages(&pages),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load page map");
                String::new()
            }
        }
    }

    pub async fn remove_page(&self, key: &str) -> Result<u64> {
        let res = sqlx::query("DELETE FROM pages WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    pub async fn clear(&self) -> Result<u64> {
        let res = sqlx::query("DELETE FROM pages")
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }
}

/// Renders pages as `=== PAGE: {key} ===` sections, sorted by key.
pub fn combine_pages(pages: &[PageEntry]) -> String {
    let mut sorted: Vec<&PageEntry> = pages.iter().collect();
    sorted.sort_by(|a, b| a.key.cmp(&b.key));

    sorted
        .iter()
        .map(|p| format!("=== PAGE: {} ===\n{}\n", p.key, p.text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db;
    use tempfile::TempDir;

    async fn store() -> (TempDir, PageStore) {
        let tmp = TempDir::new().unwrap();
        let cfg = Config::minimal(tmp.path().join("posa.sqlite"));
        let pool = db::open(&cfg).await.unwrap();
        (tmp, PageStore::new(pool))
    }

    fn entry(key: &str, text: &str) -> PageEntry {
        PageEntry {
            key: key.to_string(),
            text: text.to_string(),
            digest: String::new(),
            scanned_at: Utc::now(),
        }
    }

    #[test]
    fn test_combine_sorts_and_formats() {
        let pages = vec![entry("/sales", "S"), entry("/inventory", "I")];
        assert_eq!(
            combine_pages(&pages),
            "=== PAGE: /inventory ===\nI\n\n=== PAGE: /sales ===\nS\n"
        );
    }

    #[test]
    fn test_combine_empty() {
        assert_eq!(combine_pages(&[]), "");
    }

    #[tokio::test]
    async fn test_update_reports_changes() {
        let (_tmp, store) = store().await;

        assert!(store.update_page_content("/products", "Cola").await.unwrap());
        assert!(!store.update_page_content("/products", "Cola").await.unwrap());
        assert!(store.update_page_content("/products", "Chips").await.unwrap());

        let map = store.page_map().await.unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map[0].text, "Chips");
    }

    #[tokio::test]
    async fn test_combined_context_from_store() {
        let (_tmp, store) = store().await;
        store.update_page_content("/users", "admin").await.unwrap();
        store.update_page_content("/", "home").await.unwrap();

        let ctx = store.get_combined_context().await;
        assert!(ctx.starts_with("=== PAGE: / ===\nhome\n"));
        assert!(ctx.ends_with("=== PAGE: /users ===\nadmin\n"));
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let (_tmp, store) = store().await;
        store.update_page_content("/a", "1").await.unwrap();
        store.update_page_content("/b", "2").await.unwrap();

        assert_eq!(store.remove_page("/a").await.unwrap(), 1);
        assert_eq!(store.remove_page("/a").await.unwrap(), 0);
        assert_eq!(store.clear().await.unwrap(), 1);
        assert_eq!(store.get_combined_context().await, "");
    }
}
