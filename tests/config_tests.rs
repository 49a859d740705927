// Config loading and validation tests

use fleetwatch::config::AppConfig;

const VALID_CONFIG: &str = r#"
[server]
port = 8081
host = "0.0.0.0"

[database]
path = "data/inventory.db"
max_pool_size = 10

[collector]
max_concurrent_hosts = 4

[scanner]
default_subnets = ["192.168.1", "10.0.0"]

[schedule]
poll_interval_secs = 600
scan_interval_secs = 86400

[host_groups.lab]
addresses = ["10.0.0.11", "10.0.0.12"]
password = "lab-secret"

[host_groups.prod]
addresses = ["10.1.0.11"]
username = "svc-inventory"
password_env = "FLEETWATCH_TEST_PROD_PASSWORD"
"#;

#[test]
fn test_config_loads_from_str() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("load_from_str");
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.database.path, "data/inventory.db");
    assert_eq!(config.collector.max_concurrent_hosts, 4);
    assert_eq!(config.collector.default_username, "root");
    assert!(config.collector.accept_invalid_certs);
    assert_eq!(config.scanner.max_concurrent_probes, 50);
    assert_eq!(config.schedule.poll_interval_secs, 600);
    assert_eq!(config.schedule.scan_interval_secs, Some(86400));
    assert_eq!(config.host_groups.len(), 2);
}

#[test]
fn test_config_defaults_when_sections_missing() {
    let minimal = r#"
[server]
port = 8081
host = "127.0.0.1"

[database]
path = "inventory.db"
"#;
    let config = AppConfig::load_from_str(minimal).expect("load_from_str");
    assert_eq!(config.database.max_pool_size, 10);
    assert_eq!(config.collector.max_concurrent_hosts, 10);
    assert_eq!(config.scanner.probe_timeout_ms, 1000);
    assert_eq!(config.schedule.poll_interval_secs, 3600);
    assert!(config.schedule.poll_schedule.is_none());
    assert!(config.host_groups.is_empty());

    let subnets = config.default_subnets().unwrap();
    assert_eq!(subnets.len(), 15);
    assert_eq!(subnets[0].as_str(), "192.168.0");
    assert_eq!(subnets[14].as_str(), "192.168.14");
}

#[test]
fn test_host_groups_resolve_credentials() {
    // SAFETY: only this test reads this variable.
    unsafe { std::env::set_var("FLEETWATCH_TEST_PROD_PASSWORD", "from-env") };
    let config = AppConfig::load_from_str(VALID_CONFIG).unwrap();
    let groups = config.host_groups().unwrap();

    let lab = groups.iter().find(|g| g.name == "lab").unwrap();
    assert_eq!(lab.username, "root");
    assert_eq!(lab.password, "lab-secret");
    assert_eq!(lab.addresses.len(), 2);

    let prod = groups.iter().find(|g| g.name == "prod").unwrap();
    assert_eq!(prod.username, "svc-inventory");
    assert_eq!(prod.password, "from-env");
}

#[test]
fn test_missing_password_env_is_reported() {
    let cfg = VALID_CONFIG.replace(
        "FLEETWATCH_TEST_PROD_PASSWORD",
        "FLEETWATCH_TEST_UNSET_PASSWORD",
    );
    let config = AppConfig::load_from_str(&cfg).unwrap();
    let err = config.host_groups().unwrap_err();
    assert!(err.to_string().contains("host_groups.prod"));
}

#[test]
fn test_config_validation_rejects_invalid_port() {
    let bad = VALID_CONFIG.replace("port = 8081", "port = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("server.port"));
}

#[test]
fn test_config_validation_rejects_empty_db_path() {
    let bad = VALID_CONFIG.replace("path = \"data/inventory.db\"", "path = \"\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("database.path"));
}

#[test]
fn test_config_validation_rejects_zero_host_concurrency() {
    let bad = VALID_CONFIG.replace("max_concurrent_hosts = 4", "max_concurrent_hosts = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("collector.max_concurrent_hosts"));
}

#[test]
fn test_config_validation_rejects_bad_subnet() {
    let bad = VALID_CONFIG.replace("\"10.0.0\"]", "\"10.0.256\"]");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("scanner.default_subnets"));
}

#[test]
fn test_config_validation_rejects_bad_cron() {
    let bad = VALID_CONFIG.replace(
        "poll_interval_secs = 600",
        "poll_interval_secs = 600\npoll_schedule = \"not a cron\"",
    );
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("schedule.poll_schedule"));
}

#[test]
fn test_config_accepts_cron_schedule() {
    let good = VALID_CONFIG.replace(
        "poll_interval_secs = 600",
        "poll_interval_secs = 600\npoll_schedule = \"0 0 * * * *\"",
    );
    let config = AppConfig::load_from_str(&good).unwrap();
    assert_eq!(config.schedule.poll_schedule.as_deref(), Some("0 0 * * * *"));
}

#[test]
fn test_config_validation_rejects_group_without_password() {
    let bad = VALID_CONFIG.replace("password = \"lab-secret\"\n", "");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("host_groups.lab"));
}
