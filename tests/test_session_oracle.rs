use chrono::{Duration, Utc};
use compass_hooks::{Compass, CompassConfig};

#[test]
fn fresh_project_is_inactive() {
    let td = tempfile::tempdir().unwrap();
    let compass = Compass::open(td.path(), CompassConfig::default());
    assert!(!compass.oracle.is_session_active());
    assert!(compass.oracle.active_signals_at(Utc::now()).is_empty());
}

#[test]
fn marked_session_goes_stale_and_is_cleaned_up() {
    let td = tempfile::tempdir().unwrap();
    let compass = Compass::open(td.path(), CompassConfig::default());
    let now = Utc::now();

    compass.oracle.mark_session_active_at(now).unwrap();
    assert!(compass.oracle.is_active_at(now));
    assert!(compass.paths.status_file().is_file());
    assert!(compass.paths.session_file().is_file());

    // Still inside the ten minute window
    assert!(!compass.oracle.cleanup_if_stale_at(now + Duration::minutes(5)));
    assert!(compass.paths.status_file().is_file());

    let later = now + Duration::minutes(20);
    assert!(!compass.oracle.is_active_at(later));
    assert!(compass.oracle.cleanup_if_stale_at(later));
    assert!(!compass.paths.status_file().exists());
    assert!(!compass.paths.session_file().exists());
    assert!(!compass.oracle.is_active_at(later));
}

#[test]
fn namespace_agent_in_ledger_keeps_session_alive_for_two_hours() {
    let td = tempfile::tempdir().unwrap();
    let compass = Compass::open(td.path(), CompassConfig::default());
    let now = Utc::now();
    compass.ledger.record_tokens_at("compass-captain", 100, now).unwrap();

    assert!(compass.oracle.is_active_at(now + Duration::minutes(30)));
    assert!(!compass.oracle.is_active_at(now + Duration::hours(3)));
}

#[test]
fn recent_docs_edit_counts_as_activity() {
    let td = tempfile::tempdir().unwrap();
    let compass = Compass::open(td.path(), CompassConfig::default());
    let docs = td.path().join("docs").join("notes");
    std::fs::create_dir_all(&docs).unwrap();
    std::fs::write(docs.join("finding.md"), "# Finding\n").unwrap();

    let signals = compass.oracle.active_signals_at(Utc::now());
    assert_eq!(signals, vec!["docs_mtime"]);
}

#[test]
fn active_agent_is_taken_once() {
    let td = tempfile::tempdir().unwrap();
    let compass = Compass::open(td.path(), CompassConfig::default());
    let now = Utc::now();
    compass.oracle.mark_session_active_at(now).unwrap();
    compass.oracle.set_active_agent("compass-gap-analysis", now).unwrap();

    assert_eq!(
        compass.oracle.take_active_agent(now).unwrap().as_deref(),
        Some("compass-gap-analysis")
    );
    assert_eq!(compass.oracle.take_active_agent(now).unwrap(), None);
}
