//! End-to-end deletion scenarios through the operation layer, against the
//! in-memory index and a recording storage session.

use common::{Configuration, RetentionWindow, TenantId};
use std::sync::Arc;
use sweeper::index::IndexQuery;
use sweeper::operations::{self, Operation, Outcome};
use sweeper::storage::Statement;
use sweeper::testing::{InMemoryIndex, IndexCall, IndexDocument, RecordingSession, StaticConnector};
use sweeper::{SweepError, WildcardPattern};

fn configured() -> Configuration {
    let mut config = Configuration::default();
    config.storage.contact_point = Some("storage.test".to_string());
    config.index.contact_point = Some("index.test".to_string());
    config.index.page_size = 2;
    config
}

fn tenant(id: &str) -> TenantId {
    TenantId::new(id).unwrap()
}

fn acme_fixture() -> Arc<InMemoryIndex> {
    Arc::new(InMemoryIndex::with_documents(vec![
        IndexDocument::branch("acme-1", "app"),
        IndexDocument::branch("acme-1", "app.web"),
        IndexDocument::branch("acme-1", "app.db"),
        IndexDocument::branch("acme-1", "app.cache"),
        IndexDocument::leaf("acme-1", "app.web.latency"),
        IndexDocument::leaf("acme-1", "app.db.latency"),
        IndexDocument::leaf("acme-1", "app.cache.latency"),
        IndexDocument::leaf("acme-1", "app.web.requests"),
        IndexDocument::leaf("globex", "app.web.latency"),
    ]))
}

fn delete_latency(dry_run: bool) -> Operation {
    Operation::DeleteMetrics {
        tenant: tenant("acme-1"),
        pattern: WildcardPattern::parse("app.*.latency").unwrap(),
        dry_run,
    }
}

#[tokio::test]
async fn deletes_matching_latency_metrics_for_one_tenant() {
    let index = acme_fixture();
    let session = Arc::new(RecordingSession::new());
    let connector = StaticConnector::new(index.clone(), session.clone());
    let config = configured();

    let outcome = operations::run(
        &delete_latency(false),
        &config,
        &connector,
        |prompt| prompt.accepts("Yes, I am"),
        &mut Vec::new(),
    )
    .await
    .unwrap();

    let report = match outcome {
        Outcome::MetricsDeleted(report) => report,
        other => panic!("expected deletion, got {other:?}"),
    };
    assert_eq!(report.processed, 3);
    assert_eq!(report.index_documents_deleted, 3);

    // one delete per retention window for each matched path
    let deletes = session
        .statements()
        .into_iter()
        .filter(|s| matches!(s, Statement::Delete { .. }))
        .count();
    assert_eq!(deletes, 6);
    for window in RetentionWindow::ALL {
        let mut paths = session.deleted_paths(window);
        paths.sort();
        assert_eq!(
            paths,
            vec!["app.cache.latency", "app.db.latency", "app.web.latency"]
        );
    }

    let bulk_deletes: Vec<IndexCall> = index
        .calls()
        .into_iter()
        .filter(|c| matches!(c, IndexCall::DeleteByQuery(_)))
        .collect();
    let pattern = WildcardPattern::parse("app.*.latency").unwrap();
    assert_eq!(
        bulk_deletes,
        vec![IndexCall::DeleteByQuery(IndexQuery::leaf_paths(
            &tenant("acme-1"),
            pattern.regex()
        ))]
    );

    let mut acme_left: Vec<String> = index
        .documents()
        .into_iter()
        .filter(|d| d.tenant == "acme-1")
        .map(|d| d.path)
        .collect();
    acme_left.sort();
    assert_eq!(
        acme_left,
        vec!["app", "app.cache", "app.db", "app.web", "app.web.requests"]
    );
    assert!(
        index
            .documents()
            .iter()
            .any(|d| d.tenant == "globex" && d.path == "app.web.latency")
    );
}

#[tokio::test]
async fn second_run_finds_nothing_left() {
    let index = acme_fixture();
    let session = Arc::new(RecordingSession::new());
    let connector = StaticConnector::new(index.clone(), session.clone());
    let config = configured();
    let confirm = |prompt: &operations::ConfirmationPrompt| prompt.accepts("Yes, I am");

    operations::run(
        &delete_latency(false),
        &config,
        &connector,
        confirm,
        &mut Vec::new(),
    )
    .await
    .unwrap();
    let statements = session.statements().len();

    let outcome = operations::run(
        &delete_latency(false),
        &config,
        &connector,
        confirm,
        &mut Vec::new(),
    )
    .await
    .unwrap();

    match outcome {
        Outcome::MetricsDeleted(report) => {
            assert_eq!(report.processed, 0);
            assert_eq!(report.index_documents_deleted, 0);
        }
        other => panic!("expected deletion, got {other:?}"),
    }
    assert_eq!(session.statements().len(), statements);
}

#[tokio::test]
async fn dry_run_prints_paths_and_changes_nothing() {
    let index = acme_fixture();
    let session = Arc::new(RecordingSession::new());
    let connector = StaticConnector::new(index.clone(), session.clone());
    let mut out = Vec::new();

    let outcome = operations::run(
        &delete_latency(true),
        &configured(),
        &connector,
        |_| false,
        &mut out,
    )
    .await
    .unwrap();

    assert_eq!(outcome, Outcome::Previewed { matched: 3 });
    let mut printed: Vec<String> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    printed.sort();
    assert_eq!(
        printed,
        vec!["app.cache.latency", "app.db.latency", "app.web.latency"]
    );
    assert!(session.statements().is_empty());
    assert_eq!(index.documents().len(), 9);
    assert!(connector.storage_tenants().is_empty());
}

#[tokio::test]
async fn declined_confirmation_never_connects() {
    let index = acme_fixture();
    let session = Arc::new(RecordingSession::new());
    let connector = StaticConnector::new(index.clone(), session.clone());

    let outcome = operations::run(
        &Operation::RemoveTenant {
            tenant: tenant("acme-1"),
        },
        &configured(),
        &connector,
        |prompt| prompt.accepts("Yes, I am"),
        &mut Vec::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcome, Outcome::Declined);
    assert_eq!(connector.index_connects(), 0);
    assert!(connector.storage_tenants().is_empty());
    assert!(index.calls().is_empty());
    assert!(session.statements().is_empty());
}

#[tokio::test]
async fn removes_tenant_from_index_and_storage() {
    let index = acme_fixture();
    let session = Arc::new(RecordingSession::new());
    let connector = StaticConnector::new(index.clone(), session.clone());

    let outcome = operations::run(
        &Operation::RemoveTenant {
            tenant: tenant("acme-1"),
        },
        &configured(),
        &connector,
        |prompt| prompt.accepts("Yes, I am sure I want to remove acme-1"),
        &mut Vec::new(),
    )
    .await
    .unwrap();

    let report = match outcome {
        Outcome::TenantRemoved(report) => report,
        other => panic!("expected tenant removal, got {other:?}"),
    };
    assert_eq!(report.index_documents_deleted, 8);
    assert_eq!(report.namespace.as_str(), "acme_1");
    assert_eq!(
        session.statements(),
        vec![
            Statement::Truncate {
                window: RetentionWindow::Minute
            },
            Statement::Truncate {
                window: RetentionWindow::FifteenMinutes
            },
        ]
    );
    let left: Vec<String> = index.documents().into_iter().map(|d| d.tenant).collect();
    assert_eq!(left, vec!["globex"]);
}

#[tokio::test]
async fn colliding_namespaces_are_refused() {
    let index = acme_fixture();
    index.insert(IndexDocument::leaf("acme.1", "app.web.latency"));
    let session = Arc::new(RecordingSession::new());
    let connector = StaticConnector::new(index.clone(), session.clone());

    let error = operations::run(
        &delete_latency(false),
        &configured(),
        &connector,
        |prompt| prompt.accepts("Yes, I am"),
        &mut Vec::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(error, SweepError::NamespaceCollision { .. }));
    assert!(session.statements().is_empty());
    assert_eq!(index.documents().len(), 10);
}

#[tokio::test]
async fn storage_failure_reports_partial_progress() {
    let docs = (0..6)
        .map(|i| IndexDocument::leaf("acme-1", format!("svc.m{i}")))
        .collect();
    let index = Arc::new(InMemoryIndex::with_documents(docs));
    let session = Arc::new(RecordingSession::failing_on("svc.m4"));
    let connector = StaticConnector::new(index.clone(), session.clone());
    let mut config = configured();
    config.coordinator.max_in_flight_deletes = 1;

    let error = operations::run(
        &Operation::DeleteMetrics {
            tenant: tenant("acme-1"),
            pattern: WildcardPattern::parse("svc.*").unwrap(),
            dry_run: false,
        },
        &config,
        &connector,
        |prompt| prompt.accepts("Yes, I am"),
        &mut Vec::new(),
    )
    .await
    .unwrap_err();

    assert_eq!(error.processed(), Some(4));
    assert!(matches!(error, SweepError::Storage { .. }));
    // index untouched so a re-run finds the remaining paths
    assert_eq!(index.documents().len(), 6);
}
