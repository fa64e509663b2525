use compass_hooks::config::{self, CompassConfig};
use std::time::Duration;

fn with_env<K: AsRef<str>, V: AsRef<str>, F: FnOnce()>(pairs: &[(K, V)], f: F) {
    let saved: Vec<(String, Option<String>)> = pairs
        .iter()
        .map(|(k, _)| (k.as_ref().to_string(), std::env::var(k.as_ref()).ok()))
        .collect();
    for (k, v) in pairs.iter() {
        std::env::set_var(k.as_ref(), v.as_ref());
    }
    f();
    for (k, v) in saved {
        match v {
            Some(val) => std::env::set_var(k, val),
            None => std::env::remove_var(k),
        }
    }
}

// Environment is process-wide; keep every env-dependent assertion in one test
#[test]
fn config_loads_from_env_then_json() {
    let td = tempfile::tempdir().unwrap();
    let cfg_file = td.path().join("compass.json");
    let cfg_text = r#"{
      "session_timeout_secs": 900,
      "coordinator_agent": "compass-lead",
      "allowed_root_globs": ["Cargo.toml", "*.lock"],
      "token_multipliers": { "compass-coder": 2.5 }
    }"#;
    std::fs::write(&cfg_file, cfg_text).unwrap();

    with_env(
        &[
            ("COMPASS_SESSION_TIMEOUT_SECS", "120"),
            ("COMPASS_MAX_VALIDATION_DEPTH", "5"),
            ("COMPASS_COMPLEXITY_GATE", "yes"),
            ("COMPASS_ALLOWED_ROOT_GLOBS", "Makefile"),
            ("COMPASS_CONFIG_FILE", cfg_file.to_string_lossy().as_ref()),
        ],
        || {
            let cfg = config::load_config(td.path());
            // JSON wins over env where both are set
            assert_eq!(cfg.session_timeout, Duration::from_secs(900));
            assert!(config::is_allowed_root_file(&cfg, "Cargo.lock"));
            assert!(!config::is_allowed_root_file(&cfg, "Makefile"));
            // Env-only values survive
            assert_eq!(cfg.max_validation_depth, 5);
            assert!(cfg.complexity_gate);
            assert_eq!(cfg.coordinator_agent, "compass-lead");
            assert_eq!(cfg.token_multipliers.get("compass-coder"), Some(&2.5));
            assert_eq!(cfg.token_multipliers.get("compass-captain"), Some(&1.2));
        },
    );

    // Unreadable JSON falls back to env and defaults
    std::fs::write(&cfg_file, "{ not json").unwrap();
    with_env(
        &[
            ("COMPASS_CONFIG_FILE", cfg_file.to_string_lossy().as_ref()),
            ("COMPASS_DENY_EXIT_CODE", "1"),
        ],
        || {
            let cfg = config::load_config(td.path());
            assert!(cfg.deny_exit_code);
            assert_eq!(cfg.coordinator_agent, CompassConfig::default().coordinator_agent);
        },
    );
}
