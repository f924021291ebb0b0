//! Cursor-driven enumeration of leaf paths matching a tenant and pattern.

use async_stream::try_stream;
use common::TenantId;
use common::config::IndexConfig;
use futures::Stream;
use std::sync::Arc;
use std::time::Duration;

use super::{IndexBackend, IndexError, IndexQuery, MetricPath, ScanPage, ScrollCursor};
use crate::wildcard::PathRegex;

/// Leaf paths returned by one scan page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionBatch {
    /// 1-based page number within the scan.
    pub number: u64,
    pub paths: Vec<MetricPath>,
}

impl DeletionBatch {
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

pub struct IndexScanner {
    index: Arc<dyn IndexBackend>,
    page_size: usize,
    keep_alive: Duration,
}

impl IndexScanner {
    pub fn new(index: Arc<dyn IndexBackend>, config: &IndexConfig) -> Self {
        Self {
            index,
            page_size: config.page_size,
            keep_alive: config.scroll_keep_alive,
        }
    }

    /// Start a scan over `tenant`'s leaves matching `regex`.
    pub async fn open(&self, tenant: &TenantId, regex: &PathRegex) -> Result<ScanPage, IndexError> {
        let query = IndexQuery::leaf_paths(tenant, regex);
        self.index
            .open_scan(&query, self.page_size, self.keep_alive)
            .await
    }

    /// Next page of an open scan; empty once exhausted.
    pub async fn next(&self, cursor: &ScrollCursor) -> Result<ScanPage, IndexError> {
        self.index.next_page(cursor, self.keep_alive).await
    }

    /// Lazily walk every page of a scan.
    ///
    /// The stream ends after the first empty page and releases the cursor.
    /// It must be drained: an abandoned scan holds server-side state until
    /// the keep-alive lapses.
    pub fn batches<'a>(
        &'a self,
        tenant: &'a TenantId,
        regex: &'a PathRegex,
    ) -> impl Stream<Item = Result<DeletionBatch, IndexError>> + Send + 'a {
        try_stream! {
            let mut page = self.open(tenant, regex).await?;
            let mut number = 0u64;

            loop {
                if page.paths.is_empty() {
                    if let Some(cursor) = page.cursor.as_ref() {
                        self.release(cursor).await;
                    }
                    break;
                }

                number += 1;
                tracing::debug!(
                    tenant = %tenant,
                    page = number,
                    entries = page.paths.len(),
                    "Fetched scan page"
                );

                let cursor = page.cursor.take();
                yield DeletionBatch {
                    number,
                    paths: std::mem::take(&mut page.paths),
                };

                match cursor {
                    Some(cursor) => page = self.next(&cursor).await?,
                    // backend without server-side cursors: one page is all
                    None => break,
                }
            }
        }
    }

    async fn release(&self, cursor: &ScrollCursor) {
        if let Err(e) = self.index.release_scan(cursor).await {
            tracing::warn!(error = %e, "Failed to release scroll cursor");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryIndex, IndexCall, IndexDocument};
    use crate::wildcard::translate;
    use futures::{StreamExt, TryStreamExt, pin_mut};
    use std::collections::HashSet;

    fn scanner(index: Arc<InMemoryIndex>, page_size: usize) -> IndexScanner {
        let config = IndexConfig {
            page_size,
            ..Default::default()
        };
        IndexScanner::new(index, &config)
    }

    fn tenant(id: &str) -> TenantId {
        TenantId::new(id).unwrap()
    }

    fn fixture(leaves: usize) -> Arc<InMemoryIndex> {
        let mut docs: Vec<IndexDocument> = (0..leaves)
            .map(|i| IndexDocument::leaf("acme", format!("app.host{i}.latency")))
            .collect();
        docs.push(IndexDocument::branch("acme", "app"));
        docs.push(IndexDocument::branch("acme", "app.host0"));
        docs.push(IndexDocument::leaf("other", "app.host0.latency"));
        docs.push(IndexDocument::leaf("acme", "app.host0.errors"));
        Arc::new(InMemoryIndex::with_documents(docs))
    }

    #[tokio::test]
    async fn test_enumerates_every_match_once_across_pages() {
        let index = fixture(25);
        let scanner = scanner(index.clone(), 10);
        let tenant = tenant("acme");
        let regex = translate("app.*.latency").unwrap();

        let batches: Vec<DeletionBatch> =
            scanner.batches(&tenant, &regex).try_collect().await.unwrap();

        assert_eq!(batches.len(), 3);
        assert_eq!(
            batches.iter().map(|b| b.number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        let paths: Vec<&str> = batches
            .iter()
            .flat_map(|b| b.paths.iter().map(MetricPath::as_str))
            .collect();
        let unique: HashSet<&str> = paths.iter().copied().collect();
        assert_eq!(paths.len(), 25);
        assert_eq!(unique.len(), 25);
        assert!(unique.iter().all(|p| p.ends_with(".latency")));

        // three data pages plus the terminating empty one, then a release
        let calls = index.calls();
        assert_eq!(
            calls
                .iter()
                .filter(|c| matches!(c, IndexCall::NextPage(_)))
                .count(),
            3
        );
        assert!(matches!(calls.last(), Some(IndexCall::ReleaseScan(_))));
    }

    #[tokio::test]
    async fn test_scan_filters_tenant_and_leaf_flag() {
        let index = fixture(3);
        let scanner = scanner(index, 100);
        let tenant = tenant("acme");
        let regex = translate("app*").unwrap();

        let batches: Vec<DeletionBatch> =
            scanner.batches(&tenant, &regex).try_collect().await.unwrap();

        let mut paths: Vec<String> = batches
            .into_iter()
            .flat_map(|b| b.paths)
            .map(|p| p.to_string())
            .collect();
        paths.sort();
        assert_eq!(
            paths,
            vec![
                "app.host0.errors",
                "app.host0.latency",
                "app.host1.latency",
                "app.host2.latency",
            ]
        );
    }

    #[tokio::test]
    async fn test_no_matches_yields_nothing() {
        let index = fixture(3);
        let scanner = scanner(index.clone(), 10);
        let tenant = tenant("acme");
        let regex = translate("db.*").unwrap();

        let batches: Vec<DeletionBatch> =
            scanner.batches(&tenant, &regex).try_collect().await.unwrap();

        assert!(batches.is_empty());
        let calls = index.calls();
        assert!(matches!(calls[0], IndexCall::OpenScan(_)));
        assert!(matches!(calls[1], IndexCall::ReleaseScan(_)));
        assert_eq!(calls.len(), 2);
    }

    #[tokio::test]
    async fn test_exact_multiple_of_page_size() {
        let index = fixture(20);
        let scanner = scanner(index, 10);
        let tenant = tenant("acme");
        let regex = translate("app.*.latency").unwrap();

        let batches: Vec<DeletionBatch> =
            scanner.batches(&tenant, &regex).try_collect().await.unwrap();

        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == 10));
    }

    #[tokio::test]
    async fn test_expired_cursor_fails_instead_of_resuming() {
        let index = fixture(25);
        let scanner = scanner(index.clone(), 10);
        let tenant = tenant("acme");
        let regex = translate("app.*.latency").unwrap();

        let stream = scanner.batches(&tenant, &regex);
        pin_mut!(stream);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 10);

        index.expire_cursors();

        match stream.next().await {
            Some(Err(IndexError::CursorExpired)) => {}
            other => panic!("expected CursorExpired, got {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_open_and_next_contract() {
        let index = fixture(15);
        let scanner = scanner(index, 10);
        let tenant = tenant("acme");
        let regex = translate("app.*.latency").unwrap();

        let first = scanner.open(&tenant, &regex).await.unwrap();
        assert_eq!(first.paths.len(), 10);
        let cursor = first.cursor.unwrap();

        let second = scanner.next(&cursor).await.unwrap();
        assert_eq!(second.paths.len(), 5);

        let third = scanner.next(&cursor).await.unwrap();
        assert!(third.paths.is_empty());
    }
}
