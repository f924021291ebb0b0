use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use super::lock;
use crate::index::{IndexBackend, IndexError, IndexQuery, MetricPath, ScanPage, ScrollCursor};

/// One path node of one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDocument {
    pub tenant: String,
    pub path: String,
    pub leaf: bool,
}

impl IndexDocument {
    pub fn leaf(tenant: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            path: path.into(),
            leaf: true,
        }
    }

    pub fn branch(tenant: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            path: path.into(),
            leaf: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexCall {
    OpenScan(IndexQuery),
    NextPage(ScrollCursor),
    ReleaseScan(ScrollCursor),
    DeleteByQuery(IndexQuery),
    ListTenants,
}

struct Scroll {
    page_size: usize,
    remaining: VecDeque<MetricPath>,
}

#[derive(Default)]
struct IndexState {
    documents: Vec<IndexDocument>,
    scrolls: HashMap<ScrollCursor, Scroll>,
    next_scroll: u64,
    calls: Vec<IndexCall>,
}

/// Index with scroll semantics close to the real one: a cursor keeps its id
/// across pages, an exhausted cursor returns empty pages until released, and
/// an unknown or expired cursor fails with [`IndexError::CursorExpired`].
#[derive(Default)]
pub struct InMemoryIndex {
    state: Mutex<IndexState>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(documents: Vec<IndexDocument>) -> Self {
        Self {
            state: Mutex::new(IndexState {
                documents,
                ..Default::default()
            }),
        }
    }

    pub fn insert(&self, document: IndexDocument) {
        lock(&self.state).documents.push(document);
    }

    pub fn documents(&self) -> Vec<IndexDocument> {
        lock(&self.state).documents.clone()
    }

    pub fn calls(&self) -> Vec<IndexCall> {
        lock(&self.state).calls.clone()
    }

    /// Cursors opened and not yet released.
    pub fn open_cursors(&self) -> usize {
        lock(&self.state).scrolls.len()
    }

    /// Drop all scroll state, as if every keep-alive lapsed.
    pub fn expire_cursors(&self) {
        lock(&self.state).scrolls.clear();
    }
}

fn matcher(query: &IndexQuery) -> Result<impl Fn(&IndexDocument) -> bool + '_, IndexError> {
    let regex = match query {
        IndexQuery::LeafPaths { regex, .. } => Some(
            regex
                .compile()
                .map_err(|e| IndexError::Status {
                    status: 400,
                    body: e.to_string(),
                })?,
        ),
        IndexQuery::Tenant { .. } => None,
    };
    let tenant = query.tenant_id().as_str();

    Ok(move |doc: &IndexDocument| {
        doc.tenant == tenant
            && match &regex {
                Some(regex) => doc.leaf && regex.is_match(&doc.path),
                None => true,
            }
    })
}

fn take_page(scroll: &mut Scroll) -> Vec<MetricPath> {
    let count = scroll.page_size.min(scroll.remaining.len());
    scroll.remaining.drain(..count).collect()
}

#[async_trait]
impl IndexBackend for InMemoryIndex {
    async fn open_scan(
        &self,
        query: &IndexQuery,
        page_size: usize,
        _keep_alive: Duration,
    ) -> Result<ScanPage, IndexError> {
        let matches = matcher(query)?;
        let mut state = lock(&self.state);
        state.calls.push(IndexCall::OpenScan(query.clone()));

        let remaining = state
            .documents
            .iter()
            .filter(|doc| matches(*doc))
            .map(|doc| MetricPath::new(doc.path.clone()))
            .collect();

        state.next_scroll += 1;
        let cursor = ScrollCursor::new(format!("scroll-{}", state.next_scroll));
        let mut scroll = Scroll {
            page_size: page_size.max(1),
            remaining,
        };
        let paths = take_page(&mut scroll);
        state.scrolls.insert(cursor.clone(), scroll);

        Ok(ScanPage {
            cursor: Some(cursor),
            paths,
        })
    }

    async fn next_page(
        &self,
        cursor: &ScrollCursor,
        _keep_alive: Duration,
    ) -> Result<ScanPage, IndexError> {
        let mut state = lock(&self.state);
        state.calls.push(IndexCall::NextPage(cursor.clone()));

        let scroll = state
            .scrolls
            .get_mut(cursor)
            .ok_or(IndexError::CursorExpired)?;
        let paths = take_page(scroll);

        Ok(ScanPage {
            cursor: Some(cursor.clone()),
            paths,
        })
    }

    async fn release_scan(&self, cursor: &ScrollCursor) -> Result<(), IndexError> {
        let mut state = lock(&self.state);
        state.calls.push(IndexCall::ReleaseScan(cursor.clone()));
        state
            .scrolls
            .remove(cursor)
            .map(|_| ())
            .ok_or(IndexError::CursorExpired)
    }

    async fn delete_by_query(&self, query: &IndexQuery) -> Result<u64, IndexError> {
        let matches = matcher(query)?;
        let mut state = lock(&self.state);
        state.calls.push(IndexCall::DeleteByQuery(query.clone()));

        let before = state.documents.len();
        state.documents.retain(|doc| !matches(doc));
        Ok((before - state.documents.len()) as u64)
    }

    async fn list_tenants(&self) -> Result<Vec<String>, IndexError> {
        let mut state = lock(&self.state);
        state.calls.push(IndexCall::ListTenants);

        let tenants: BTreeSet<String> = state
            .documents
            .iter()
            .map(|doc| doc.tenant.clone())
            .collect();
        Ok(tenants.into_iter().collect())
    }
}
