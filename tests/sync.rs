use std::sync::Arc;
use std::time::Duration;

use perfboard_sync::sync::{
    AddressBar, DebouncedSync, MemoryAddressBar, QueryMap, StateSynchronizer, TrackedField,
};

fn fields() -> Vec<TrackedField> {
    vec![
        TrackedField::new("period").with_default("This Year"),
        TrackedField::new("department"),
        TrackedField::new("search").with_query_key("q"),
    ]
}

#[test]
fn load_prefers_address_bar_over_defaults() {
    let bar = Arc::new(MemoryAddressBar::from_query_string(
        "?period=Q2+2025&q=ada&tab=reviews",
    ));
    let mut sync = StateSynchronizer::new(Arc::clone(&bar), fields());
    assert_eq!(sync.get("period"), Some("This Year"));

    assert!(sync.load());
    assert_eq!(sync.get("period"), Some("Q2 2025"));
    assert_eq!(sync.get("search"), Some("ada"));
    assert_eq!(sync.get("department"), None);
}

#[test]
fn load_runs_once() {
    let bar = Arc::new(MemoryAddressBar::from_query_string("department=Sales"));
    let mut sync = StateSynchronizer::new(Arc::clone(&bar), fields());
    assert!(sync.load());

    let mut navigated = QueryMap::new();
    navigated.insert("department".to_string(), "Ops".to_string());
    bar.navigate(navigated);
    assert!(!sync.load());
    assert_eq!(sync.get("department"), Some("Sales"));
}

#[test]
fn empty_query_values_are_absent() {
    let bar = Arc::new(MemoryAddressBar::from_query_string("period=&department=%20"));
    let mut sync = StateSynchronizer::new(Arc::clone(&bar), fields());
    sync.load();
    assert_eq!(sync.get("period"), Some("This Year"));
    assert_eq!(sync.get("department"), None);
}

#[test]
fn unchanged_state_writes_at_most_once() {
    let bar = Arc::new(MemoryAddressBar::new());
    let mut sync = StateSynchronizer::new(Arc::clone(&bar), fields());
    sync.load();

    // The default period is not in the bar yet: first commit writes it.
    assert!(sync.commit());
    for _ in 0..5 {
        assert!(!sync.commit());
    }
    assert_eq!(bar.writes(), 1);
    assert_eq!(bar.query_string(), "period=This+Year");
}

#[test]
fn commit_keeps_untracked_keys_and_drops_cleared_fields() {
    let bar = Arc::new(MemoryAddressBar::from_query_string(
        "tab=reviews&department=Sales&period=Q1+2025",
    ));
    let mut sync = StateSynchronizer::new(Arc::clone(&bar), fields());
    sync.load();

    assert!(sync.set("department", None));
    assert!(sync.set("search", Some("grace")));
    assert!(!sync.set("unknown", Some("x")));
    assert!(sync.commit());

    assert_eq!(bar.query_string(), "period=Q1+2025&q=grace&tab=reviews");
    assert!(!sync.commit());
    assert_eq!(bar.writes(), 1);
}

#[test]
fn setting_the_same_value_is_not_a_change() {
    let bar = Arc::new(MemoryAddressBar::from_query_string("department=Sales"));
    let mut sync = StateSynchronizer::new(Arc::clone(&bar), fields());
    sync.load();
    assert!(!sync.set("department", Some("Sales")));
    assert!(!sync.set("department", Some("  Sales ")));
}

#[tokio::test(start_paused = true)]
async fn rapid_changes_commit_only_the_final_value() {
    let bar = Arc::new(MemoryAddressBar::from_query_string("period=Q1+2025"));
    let sync = StateSynchronizer::new(Arc::clone(&bar), fields());
    let mut debounced = DebouncedSync::new(sync, Duration::from_millis(250));
    debounced.load();

    for department in ["Sales", "Ops", "R&D"] {
        assert!(debounced.set("department", Some(department)));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(bar.writes(), 0);
    assert!(debounced.is_pending());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(bar.writes(), 1);
    assert_eq!(
        bar.query().get("department").map(String::as_str),
        Some("R&D")
    );
    assert_eq!(bar.query_string(), "department=R%26D&period=Q1+2025");
}

#[tokio::test(start_paused = true)]
async fn shutdown_clears_pending_commit() {
    let bar = Arc::new(MemoryAddressBar::new());
    let sync = StateSynchronizer::new(Arc::clone(&bar), fields());
    let mut debounced = DebouncedSync::new(sync, Duration::from_millis(250));
    debounced.load();

    debounced.set("department", Some("Sales"));
    debounced.shutdown();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(bar.writes(), 0);
    assert_eq!(
        debounced.state().get("department").cloned().flatten().as_deref(),
        Some("Sales")
    );
}

#[tokio::test(start_paused = true)]
async fn flush_commits_immediately() {
    let bar = Arc::new(MemoryAddressBar::new());
    let sync = StateSynchronizer::new(Arc::clone(&bar), fields());
    let mut debounced = DebouncedSync::new(sync, Duration::from_millis(250));
    debounced.load();

    debounced.set("department", Some("Ops"));
    assert!(debounced.flush());
    assert!(!debounced.is_pending());
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(bar.writes(), 1);
}
