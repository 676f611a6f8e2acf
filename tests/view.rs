use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde_json::json;

use perfboard_sync::cache::RequestCache;
use perfboard_sync::normalize::RowKind;
use perfboard_sync::period::PeriodKind;
use perfboard_sync::rpc::{FetchExecutor, Params, RemoteError, RemoteProcedure, ResultEnvelope};
use perfboard_sync::staleness::ConsumerId;
use perfboard_sync::sync::{FilterState, MemoryAddressBar, StateSynchronizer, TrackedField};
use perfboard_sync::view::{LoadOutcome, ViewDefinition, ViewLoader, ViewQuery};

struct KpiRemote {
    calls: AtomicUsize,
}

#[async_trait]
impl RemoteProcedure for KpiRemote {
    async fn invoke(&self, _schema: &str, _procedure: &str, params: &Params) -> ResultEnvelope {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let period = params["period"].as_str().unwrap_or_default().to_string();
        let delay = if period.starts_with("Q1") { 100 } else { 10 };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        if params.get("department") == Some(&json!("broken")) {
            return ResultEnvelope::failure(RemoteError::new("permission denied for department"));
        }
        ResultEnvelope::success(vec![json!({
            "kpi_id": "revenue",
            "kpi_name": period,
            "value_in_period": "1500",
            "start_value": 1000,
            "target_value": 2000,
            "currency": "usd",
        })])
    }
}

fn setup() -> (Arc<KpiRemote>, RequestCache) {
    let remote = Arc::new(KpiRemote {
        calls: AtomicUsize::new(0),
    });
    let dyn_remote: Arc<dyn RemoteProcedure> = remote.clone();
    let cache = RequestCache::new(FetchExecutor::new(dyn_remote, "public"));
    (remote, cache)
}

fn kpi_view() -> ViewDefinition {
    ViewDefinition::new("kpi_cards", "kpi_summary", RowKind::Kpi)
}

fn now() -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339("2025-06-15T10:00:00Z").unwrap()
}

#[tokio::test(start_paused = true)]
async fn two_widgets_same_request_one_call() {
    let (remote, cache) = setup();
    let left = ViewLoader::new(cache.clone(), ConsumerId::new("card-left"), kpi_view());
    let right = ViewLoader::new(cache.clone(), ConsumerId::new("card-right"), kpi_view());
    let query = ViewQuery::new("abc").with_period("Q2 2025");
    let now = now();

    let (a, b) = tokio::join!(left.load(&query, &now), right.load(&query, &now));
    assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    let a = assert_matches!(a, LoadOutcome::Applied(model) => model);
    let b = assert_matches!(b, LoadOutcome::Applied(model) => model);
    assert_eq!(a.rows, b.rows);
    assert_eq!(a.rows[0].progress, Some(50.0));
    assert_eq!(a.rows[0].display_value(), "$1,500");
    assert_eq!(a.period.quarter, Some(2));
}

#[tokio::test(start_paused = true)]
async fn late_response_from_older_request_is_dropped() {
    let (_remote, cache) = setup();
    let loader = ViewLoader::new(cache, ConsumerId::new("kpi"), kpi_view());
    let slow = ViewQuery::new("abc").with_period("Q1 2025");
    let fast = ViewQuery::new("abc").with_period("Q2 2025");
    let now = now();

    let (first, second) = tokio::join!(loader.load(&slow, &now), loader.load(&fast, &now));
    assert_matches!(first, LoadOutcome::Stale);
    let model = assert_matches!(second, LoadOutcome::Applied(model) => model);
    assert_eq!(model.rows[0].label, "Q2 2025");
}

#[tokio::test(start_paused = true)]
async fn late_error_from_older_request_is_dropped() {
    let (remote, cache) = setup();
    let loader = ViewLoader::new(cache, ConsumerId::new("kpi"), kpi_view());
    let slow_failure = ViewQuery::new("abc")
        .with_period("Q1 2025")
        .with_filter("department", "broken");
    let fast = ViewQuery::new("abc").with_period("Q2 2025");
    let now = now();

    let (first, second) =
        tokio::join!(loader.load(&slow_failure, &now), loader.load(&fast, &now));
    assert_eq!(remote.calls.load(Ordering::SeqCst), 2);
    assert_matches!(first, LoadOutcome::Stale);
    assert_matches!(second, LoadOutcome::Applied(_));
}

#[tokio::test(start_paused = true)]
async fn teardown_discards_pending_response() {
    let (remote, cache) = setup();
    let loader = ViewLoader::new(cache.clone(), ConsumerId::new("kpi"), kpi_view());
    let query = ViewQuery::new("abc").with_period("Q2 2025");
    let now = now();

    let (outcome, ()) = tokio::join!(loader.load(&query, &now), async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        loader.teardown();
    });
    assert_matches!(outcome, LoadOutcome::Stale);
    assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_organization_never_fetches() {
    let (remote, cache) = setup();
    let loader = ViewLoader::new(cache, ConsumerId::new("kpi"), kpi_view());

    let outcome = loader.load(&ViewQuery::default(), &now()).await;
    assert_matches!(outcome, LoadOutcome::NotReady);
    let blank = ViewQuery::new("  ");
    assert_matches!(loader.load(&blank, &now()).await, LoadOutcome::NotReady);
    assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
    assert_eq!(loader.sequencer().current(), 0);
}

#[tokio::test(start_paused = true)]
async fn remote_error_is_passed_through() {
    let (_remote, cache) = setup();
    let loader = ViewLoader::new(cache, ConsumerId::new("kpi"), kpi_view());
    let query = ViewQuery::new("abc").with_filter("department", "broken");

    let error = assert_matches!(
        loader.load(&query, &now()).await,
        LoadOutcome::Failed(error) => error
    );
    assert_eq!(error.message, "permission denied for department");
}

#[test]
fn query_parameters_cover_period_and_filters() {
    let mut state = FilterState::new();
    state.insert("period".to_string(), Some("Q3 2025".to_string()));
    state.insert("department".to_string(), Some("Sales".to_string()));
    state.insert("team".to_string(), None);

    let query = ViewQuery::from_filters(Some("abc".to_string()), &state);
    let (period, params) = query.ready(&now()).unwrap();
    assert_eq!(period.kind, PeriodKind::Quarter);
    assert_eq!(params["org_id"], json!("abc"));
    assert_eq!(params["period"], json!("Q3 2025"));
    assert_eq!(params["department"], json!("Sales"));
    assert_eq!(params["period_start"], json!("2025-07-01T00:00:00+00:00"));
    assert!(!params.contains_key("team"));
}

#[test]
fn query_without_period_uses_current_year() {
    let (period, params) = ViewQuery::new("abc").ready(&now()).unwrap();
    assert_eq!(period.kind, PeriodKind::Year);
    assert_eq!(period.year, 2025);
    assert_eq!(params["period"], json!("This Year"));
}

#[test]
fn period_override_survives_when_period_is_not_tracked() {
    let bar = Arc::new(MemoryAddressBar::from_query_string("department=Sales"));
    let mut sync = StateSynchronizer::new(Arc::clone(&bar), vec![TrackedField::new("department")]);
    sync.load();

    let query = ViewQuery::with_overrides(
        Some("abc".to_string()),
        &mut sync,
        Some("Q2 2025"),
        vec![("region".to_string(), "EMEA".to_string())],
    );
    assert_eq!(query.period.as_deref(), Some("Q2 2025"));
    assert_eq!(query.filters.get("department").map(String::as_str), Some("Sales"));
    assert_eq!(query.filters.get("region").map(String::as_str), Some("EMEA"));

    let (period, _) = query.ready(&now()).unwrap();
    assert_eq!(period.quarter, Some(2));
}

#[test]
fn tracked_overrides_go_through_the_synchronizer() {
    let bar = Arc::new(MemoryAddressBar::new());
    let fields = vec![
        TrackedField::new("period").with_default("This Year"),
        TrackedField::new("department"),
    ];
    let mut sync = StateSynchronizer::new(Arc::clone(&bar), fields);
    sync.load();

    let query = ViewQuery::with_overrides(
        Some("abc".to_string()),
        &mut sync,
        Some("Q3 2025"),
        vec![("department".to_string(), "Ops".to_string())],
    );
    assert_eq!(sync.get("period"), Some("Q3 2025"));
    assert_eq!(sync.get("department"), Some("Ops"));
    assert_eq!(query.period.as_deref(), Some("Q3 2025"));

    assert!(sync.commit());
    assert_eq!(bar.query_string(), "department=Ops&period=Q3+2025");
}
