use backend_pool::{ConfigError, PoolConfig, PoolError, Target};
use std::time::Duration;

#[test]
fn test_parse_pool_config() {
    let json = r#"{
        "min_connections": 2,
        "max_connections": 8,
        "batch_size": 3,
        "cleanup_interval_seconds": 0.5,
        "acquire_timeout_seconds": 2,
        "check_timeout_seconds": null,
        "max_lifetime_seconds": 1800
    }"#;
    let c: PoolConfig = serde_json::from_str(json).unwrap();
    assert_eq!(c.min_connections(), 2);
    assert_eq!(c.max_connections(), 8);
    assert_eq!(c.batch_size(), 3);
    assert_eq!(c.cleanup_interval(), Duration::from_millis(500));
    assert_eq!(c.acquire_timeout(), Some(Duration::from_secs(2)));
    assert_eq!(c.check_timeout(), None);
    assert_eq!(c.max_lifetime(), Some(Duration::from_secs(1800)));
    assert!(c.validate().is_ok());
}

#[test]
fn test_missing_keys_use_defaults() {
    let c: PoolConfig = serde_json::from_str(r#"{"max_connections": 50}"#).unwrap();
    let d = PoolConfig::default();
    assert_eq!(c.max_connections(), 50);
    assert_eq!(c.min_connections(), d.min_connections());
    assert_eq!(c.cleanup_interval(), d.cleanup_interval());
    assert_eq!(c.check_timeout(), Some(Duration::from_secs(10)));
    assert_eq!(c.acquire_timeout(), None);
}

#[test]
fn test_negative_interval_is_rejected() {
    let r = serde_json::from_str::<PoolConfig>(r#"{"cleanup_interval_seconds": -1}"#);
    assert!(r.is_err());
}

#[test]
fn test_serialize_uses_seconds() {
    let c = PoolConfig::new(1, 4).with_cleanup_interval(Duration::from_secs(90));
    let v = serde_json::to_value(&c).unwrap();
    assert_eq!(v["cleanup_interval_seconds"], 90.0);
    assert_eq!(v["max_lifetime_seconds"], serde_json::Value::Null);
}

#[test]
fn test_config_error_message() {
    let e: PoolError<String> = ConfigError::MinExceedsMax { min: 9, max: 3 }.into();
    assert_eq!(
        e.to_string(),
        "invalid pool configuration: min_connections (9) cannot exceed max_connections (3)"
    );
}

#[test]
fn test_parse_target() {
    let t: Target = serde_json::from_str(
        r#"{"host": "db.internal", "database": "chat", "user": "server", "password": "s3cret"}"#,
    )
    .unwrap();
    assert_eq!(t.port, 5432);
    assert_eq!(
        t.connection_string(),
        "host=db.internal port=5432 dbname=chat user=server password=s3cret"
    );
    assert!(!format!("{:?}", t).contains("s3cret"));
}
