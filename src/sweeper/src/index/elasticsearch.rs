//! Elasticsearch implementation of [`IndexBackend`] over its REST API.
//!
//! Documents carry `path`, `tenant` and `leaf`. Path and tenant are matched
//! through their `.keyword` sub-fields so that regexps and terms apply to the
//! unanalyzed value.

use async_trait::async_trait;
use common::config::IndexConfig;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

use super::{IndexBackend, IndexError, IndexQuery, MetricPath, ScanPage, ScrollCursor};

const PATH_FIELD: &str = "path.keyword";
const TENANT_FIELD: &str = "tenant.keyword";
const LEAF_FIELD: &str = "leaf";

/// Upper bound on distinct tenants returned by [`IndexBackend::list_tenants`].
const MAX_TENANT_BUCKETS: usize = 65_536;

pub struct ElasticsearchIndex {
    client: Client,
    base_url: String,
    index_name: String,
    /// Server-side timeout and scroll lifetime for delete-by-query.
    job_timeout: Duration,
}

impl ElasticsearchIndex {
    pub fn new(base_url: &str, config: &IndexConfig) -> Result<Self, IndexError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| IndexError::Transport(e.to_string()))?;

        tracing::info!(
            url = %base_url,
            index = %config.index_name,
            "Using search index"
        );

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            index_name: config.index_name.clone(),
            job_timeout: config.request_timeout,
        })
    }

    async fn post_json(&self, url: String, body: &Value) -> Result<Vec<u8>, IndexError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| IndexError::Transport(e.to_string()))?;
        read_body(response).await
    }
}

async fn read_body(response: reqwest::Response) -> Result<Vec<u8>, IndexError> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| IndexError::Transport(e.to_string()))?;

    if status.is_success() {
        return Ok(body.to_vec());
    }

    let body = String::from_utf8_lossy(&body).into_owned();
    if is_scroll_missing(status, &body) {
        return Err(IndexError::CursorExpired);
    }
    Err(IndexError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Elasticsearch time unit string, e.g. `14400s`.
pub fn time_value(duration: Duration) -> String {
    format!("{}s", duration.as_secs().max(1))
}

/// Query DSL for an [`IndexQuery`].
pub fn query_dsl(query: &IndexQuery) -> Value {
    match query {
        IndexQuery::LeafPaths { tenant, regex } => json!({
            "bool": {
                "must": [
                    { "regexp": { PATH_FIELD: regex.as_str() } }
                ],
                "filter": [
                    { "term": { TENANT_FIELD: tenant.as_str() } },
                    { "term": { LEAF_FIELD: true } }
                ]
            }
        }),
        IndexQuery::Tenant { tenant } => json!({
            "bool": {
                "filter": [
                    { "term": { TENANT_FIELD: tenant.as_str() } }
                ]
            }
        }),
    }
}

/// Body of the request opening a scroll.
pub fn scan_request(query: &IndexQuery, page_size: usize) -> Value {
    json!({
        "_source": ["path"],
        "size": page_size,
        "query": query_dsl(query),
    })
}

fn tenants_request() -> Value {
    json!({
        "size": 0,
        "aggs": {
            "tenants": {
                "terms": { "field": TENANT_FIELD, "size": MAX_TENANT_BUCKETS }
            }
        }
    })
}

/// 404s for released or expired scroll contexts.
pub fn is_scroll_missing(status: StatusCode, body: &str) -> bool {
    status == StatusCode::NOT_FOUND
        && (body.contains("search_context_missing_exception")
            || body.contains("No search context found"))
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "_scroll_id")]
    scroll_id: Option<String>,
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_source")]
    source: PathSource,
}

#[derive(Debug, Deserialize)]
struct PathSource {
    path: String,
}

#[derive(Debug, Deserialize)]
struct DeleteByQueryResponse {
    #[serde(default)]
    deleted: u64,
    #[serde(default)]
    timed_out: bool,
    #[serde(default)]
    failures: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct AggregationResponse {
    aggregations: TenantAggregations,
}

#[derive(Debug, Deserialize)]
struct TenantAggregations {
    tenants: TermsAggregation,
}

#[derive(Debug, Deserialize)]
struct TermsAggregation {
    #[serde(default)]
    sum_other_doc_count: u64,
    buckets: Vec<TermsBucket>,
}

#[derive(Debug, Deserialize)]
struct TermsBucket {
    key: String,
}

pub fn parse_scan_page(body: &[u8]) -> Result<ScanPage, IndexError> {
    let response: SearchResponse =
        serde_json::from_slice(body).map_err(|e| IndexError::Decode(e.to_string()))?;

    Ok(ScanPage {
        cursor: response.scroll_id.map(ScrollCursor::new),
        paths: response
            .hits
            .hits
            .into_iter()
            .map(|hit| MetricPath::new(hit.source.path))
            .collect(),
    })
}

pub fn parse_delete_by_query(body: &[u8]) -> Result<u64, IndexError> {
    let response: DeleteByQueryResponse =
        serde_json::from_slice(body).map_err(|e| IndexError::Decode(e.to_string()))?;

    if let Some(first) = response.failures.first() {
        return Err(IndexError::BulkDeleteFailed {
            count: response.failures.len(),
            first: first.to_string(),
        });
    }
    if response.timed_out {
        return Err(IndexError::TimedOut {
            deleted: response.deleted,
        });
    }
    Ok(response.deleted)
}

/// Tenants of a terms aggregation. A response that left tenants out of its
/// buckets is an error, since callers rely on seeing every tenant.
pub fn parse_tenants(body: &[u8]) -> Result<Vec<String>, IndexError> {
    let response: AggregationResponse =
        serde_json::from_slice(body).map_err(|e| IndexError::Decode(e.to_string()))?;
    let tenants = response.aggregations.tenants;

    if tenants.sum_other_doc_count > 0 {
        return Err(IndexError::TenantListTruncated {
            omitted: tenants.sum_other_doc_count,
        });
    }
    Ok(tenants
        .buckets
        .into_iter()
        .map(|bucket| bucket.key)
        .collect())
}

#[async_trait]
impl IndexBackend for ElasticsearchIndex {
    async fn open_scan(
        &self,
        query: &IndexQuery,
        page_size: usize,
        keep_alive: Duration,
    ) -> Result<ScanPage, IndexError> {
        let url = format!(
            "{}/{}/_search?scroll={}",
            self.base_url,
            self.index_name,
            time_value(keep_alive)
        );
        let body = self.post_json(url, &scan_request(query, page_size)).await?;
        parse_scan_page(&body)
    }

    async fn next_page(
        &self,
        cursor: &ScrollCursor,
        keep_alive: Duration,
    ) -> Result<ScanPage, IndexError> {
        let url = format!("{}/_search/scroll", self.base_url);
        let request = json!({
            "scroll": time_value(keep_alive),
            "scroll_id": cursor.as_str(),
        });
        let body = self.post_json(url, &request).await?;
        parse_scan_page(&body)
    }

    async fn release_scan(&self, cursor: &ScrollCursor) -> Result<(), IndexError> {
        let response = self
            .client
            .delete(format!("{}/_search/scroll", self.base_url))
            .json(&json!({ "scroll_id": cursor.as_str() }))
            .send()
            .await
            .map_err(|e| IndexError::Transport(e.to_string()))?;
        read_body(response).await.map(|_| ())
    }

    async fn delete_by_query(&self, query: &IndexQuery) -> Result<u64, IndexError> {
        let url = format!(
            "{}/{}/_delete_by_query?scroll={}&timeout={}",
            self.base_url,
            self.index_name,
            time_value(self.job_timeout),
            time_value(self.job_timeout)
        );
        tracing::info!(
            tenant = %query.tenant_id(),
            index = %self.index_name,
            "Issuing delete-by-query"
        );
        let body = self
            .post_json(url, &json!({ "query": query_dsl(query) }))
            .await?;
        parse_delete_by_query(&body)
    }

    async fn list_tenants(&self) -> Result<Vec<String>, IndexError> {
        let url = format!("{}/{}/_search", self.base_url, self.index_name);
        let body = self.post_json(url, &tenants_request()).await?;
        parse_tenants(&body)
    }
}
