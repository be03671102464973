//! Route scanning.
//!
//! Fetches dashboard pages over HTTP (or reads saved HTML), extracts their
//! visible text and stores it in the [`PageStore`]. A page that cannot be
//! fetched is logged and skipped; the rest of the pass carries on.
//!
//! Routes in a pass are fetched concurrently with no ordering guarantee.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use std::time::Duration;
use tokio::task::JoinSet;
use walkdir::WalkDir;

use crate::config::{Config, SnapshotsConfig};
use crate::extract::{extract_text, normalize_whitespace};
use crate::models::ScanReport;
use crate::page_store::PageStore;

/// Key used when a page is scanned without a known route.
pub const UNKNOWN_KEY: &str = "unknown";

#[derive(Clone)]
pub struct Scanner {
    client: reqwest::Client,
    base_url: reqwest::Url,
    collapse_whitespace: bool,
    store: PageStore,
}

impl Scanner {
    pub fn new(config: &Config, store: PageStore) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.scan.timeout_secs))
            .build()?;
        let base_url = reqwest::Url::parse(&config.scan.base_url)
            .with_context(|| format!("invalid scan.base_url: {}", config.scan.base_url))?;

        Ok(Self {
            client,
            base_url,
            collapse_whitespace: config.scan.collapse_whitespace,
            store,
        })
    }

    pub fn store(&self) -> &PageStore {
        &self.store
    }

    fn page_text(&self, html: &str) -> String {
        let text = extract_text(html);
        if self.collapse_whitespace {
            normalize_whitespace(&text)
        } else {
            text
        }
    }

    /// Fetches one route and stores its text under the normalized route.
    ///
    /// Returns `Ok(true)` when the stored text changed.
    pub async fn scan_url(&self, route: &str) -> Result<bool> {
        let route = normalize_route(route);
        let url = route_url(&self.base_url, &route)?;

        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()?;
        let html = resp.text().await?;

        let text = self.page_text(&html);
        self.store.update_page_content(&route, &text).await
    }

    /// Scans every route concurrently. Failures are recorded in the report
    /// rather than returned.
    pub async fn scan_all_routes(&self, routes: &[String]) -> ScanReport {
        let mut tasks = JoinSet::new();
        for route in routes.iter().map(|r| normalize_route(r)) {
            let scanner = self.clone();
            tasks.spawn(async move {
                let outcome = scanner.scan_url(&route).await;
                (route, outcome)
            });
        }

        let mut report = ScanReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((route, Ok(changed))) => {
                    if changed {
                        report.changed.push(route.clone());
                    }
                    report.scanned.push(route);
                }
                Ok((route, Err(e))) => {
                    tracing::warn!(route = %route, error = %format!("{:#}", e), "scan failed");
                    report.failed.push(route);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "scan task aborted");
                }
            }
        }

        report.scanned.sort();
        report.changed.sort();
        report.failed.sort();
        tracing::info!(
            scanned = report.scanned.len(),
            changed = report.changed.len(),
            failed = report.failed.len(),
            "scan pass finished"
        );
        report
    }

    /// Stores the text of an already-loaded page (the page the user is on).
    pub async fn scan_current_page(&self, key: Option<&str>, html: &str) -> Result<bool> {
        let key = key
            .filter(|k| !k.trim().is_empty())
            .unwrap_or(UNKNOWN_KEY);
        let text = self.page_text(html);
        self.store.update_page_content(key, &text).await
    }

    /// Indexes every saved HTML page under the snapshot root.
    ///
    /// `inventory.html` is stored as `/inventory`, `index.html` as `/`.
    /// Unreadable files are logged and listed as failed.
    pub async fn scan_snapshots(&self, snapshots: &SnapshotsConfig) -> Result<ScanReport> {
        let root = &snapshots.root;
        if !root.exists() {
            anyhow::bail!("Snapshot root does not exist: {}", root.display());
        }

        let include = build_globset(&snapshots.include_globs)?;
        let exclude = build_globset(&snapshots.exclude_globs)?;

        let mut report = ScanReport::default();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable snapshot entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
            if !include.is_match(rel) || exclude.is_match(rel) {
                continue;
            }

            let key = snapshot_route(rel);
            match std::fs::read_to_string(entry.path()) {
                Ok(html) => {
                    if self.scan_current_page(Some(key.as_str()), &html).await? {
                        report.changed.push(key.clone());
                    }
                    report.scanned.push(key);
                }
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "cannot read snapshot");
                    report.failed.push(key);
                }
            }
        }

        Ok(report)
    }
}

/// Prefixes `/` when missing.
pub fn normalize_route(route: &str) -> String {
    if route.starts_with('/') {
        route.to_string()
    } else {
        format!("/{}", route)
    }
}

/// Appends `route` to the base URL's path. Unlike `Url::join`, a prefix in
/// the base path is kept and `//host` routes stay on the same host.
pub fn route_url(base: &reqwest::Url, route: &str) -> Result<reqwest::Url> {
    let joined = format!("{}{}", base.as_str().trim_end_matches('/'), normalize_route(route));
    reqwest::Url::parse(&joined).with_context(|| format!("cannot build URL for route {}", route))
}

/// Maps a snapshot path relative to the root to the route it was saved from.
pub fn snapshot_route(rel: &Path) -> String {
    let without_ext = rel.with_extension("");
    let parts: Vec<String> = without_ext
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();

    let mut route = parts.join("/");
    if route == "index" {
        route.clear();
    } else if let Some(stripped) = route.strip_suffix("/index") {
        route = stripped.to_string();
    }
    normalize_route(&route)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
