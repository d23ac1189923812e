//! Integration test: configuration cache and configuration history.

use std::time::Duration;

use cohort_config::{CONFIG_SINGLETON_KEY, ConfigError, DB_CONFIG_KEY};
use cohort_integration_tests::{EPOCH, TestRegistry};
use serde_json::json;

#[test]
fn test_list_setting_is_not_a_single_setting() {
    let t = TestRegistry::in_memory();
    let config = t.registry.config();
    config.store_config(CONFIG_SINGLETON_KEY, json!({"k": [1, 2]})).unwrap();

    assert_eq!(config.get_setting_list("k", None).unwrap(), vec![json!(1), json!(2)]);
    assert!(matches!(
        config.get_setting("k", None),
        Err(ConfigError::InvalidConfig { key, .. }) if key == "k"
    ));
    assert!(matches!(
        config.get_setting("absent", None),
        Err(ConfigError::MissingConfig { key }) if key == "absent"
    ));
    assert_eq!(config.get_setting("absent", Some(json!("x"))).unwrap(), json!("x"));
}

#[test]
fn test_first_read_bootstraps_empty_configuration() {
    let t = TestRegistry::in_memory();
    let config = t.registry.config();

    assert_eq!(config.get(CONFIG_SINGLETON_KEY).unwrap(), json!({}));
    let history = config.dao().history(CONFIG_SINGLETON_KEY).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].committed_at, EPOCH);

    // Only the main configuration bootstraps itself.
    assert!(matches!(
        config.get(DB_CONFIG_KEY),
        Err(ConfigError::NotFound { .. })
    ));
}

/// Writes that bypass the cache stay invisible until the TTL runs out or
/// the cache is invalidated.
#[test]
fn test_cache_ttl_and_invalidate() {
    let t = TestRegistry::in_memory();
    let config = t.registry.config();
    config.store_config(CONFIG_SINGLETON_KEY, json!({"k": ["old"]})).unwrap();
    assert_eq!(config.get_setting("k", None).unwrap(), json!("old"));

    config.dao().store(CONFIG_SINGLETON_KEY, json!({"k": ["new"]})).unwrap();
    t.advance(Duration::from_secs(59));
    assert_eq!(config.get_setting("k", None).unwrap(), json!("old"));

    t.advance(Duration::from_secs(1));
    assert_eq!(config.get_setting("k", None).unwrap(), json!("new"));

    config.dao().store(CONFIG_SINGLETON_KEY, json!({"k": ["newer"]})).unwrap();
    assert_eq!(config.get_setting("k", None).unwrap(), json!("new"));
    config.invalidate();
    assert_eq!(config.get_setting("k", None).unwrap(), json!("newer"));
}

#[test]
fn test_active_at_returns_config_committed_strictly_before() {
    let t = TestRegistry::in_memory();
    let config = t.registry.config();

    let t1 = t.now();
    config.store_config(CONFIG_SINGLETON_KEY, json!({"v": [1]})).unwrap();
    t.advance(Duration::from_secs(10));
    let t2 = t.now();
    config.store_config(CONFIG_SINGLETON_KEY, json!({"v": [2]})).unwrap();
    t.advance(Duration::from_secs(10));
    config.store_config(CONFIG_SINGLETON_KEY, json!({"v": [3]})).unwrap();

    assert!(matches!(
        config.get_config_active_at(CONFIG_SINGLETON_KEY, t1),
        Err(ConfigError::NotFoundAt { .. })
    ));
    let just_after_t1 = t1.saturating_add(Duration::from_millis(1));
    assert_eq!(
        config.get_config_active_at(CONFIG_SINGLETON_KEY, just_after_t1).unwrap(),
        json!({"v": [1]})
    );
    assert_eq!(
        config.get_config_active_at(CONFIG_SINGLETON_KEY, t2).unwrap(),
        json!({"v": [1]})
    );
    let later = t.now().saturating_add(Duration::from_secs(1));
    assert_eq!(
        config.get_config_active_at(CONFIG_SINGLETON_KEY, later).unwrap(),
        json!({"v": [3]})
    );

    let versions: Vec<u32> = config
        .dao()
        .history(CONFIG_SINGLETON_KEY)
        .unwrap()
        .into_iter()
        .map(|r| r.version)
        .collect();
    assert_eq!(versions, vec![1, 2, 3]);
}

#[test]
fn test_overrides_shadow_stored_settings() {
    let t = TestRegistry::in_memory();
    let config = t.registry.config();
    config.insert_config("k", vec![json!("stored")]).unwrap();

    config.override_setting("k", json!(["override"]));
    assert_eq!(config.get_setting("k", None).unwrap(), json!("override"));
    config.clear_overrides();
    assert_eq!(config.get_setting("k", None).unwrap(), json!("stored"));
}

/// The accepted order test codes come from configuration.
#[test]
fn test_order_test_codes_follow_configuration() {
    let t = TestRegistry::in_memory();
    let orders = t.registry.orders();
    assert_eq!(orders.baseline_test_codes().unwrap().len(), 8);

    t.registry
        .config()
        .insert_config("baseline_sample_test_codes", vec![json!("1ED10"), json!("9XX99")])
        .unwrap();
    assert_eq!(orders.baseline_test_codes().unwrap(), vec!["1ED10", "9XX99"]);
}
