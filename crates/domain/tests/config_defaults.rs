use mg_domain::config::Config;

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
}

#[test]
fn empty_file_uses_all_defaults() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.server.port, 8620);
    assert_eq!(config.vault.secret_env, "MG_VAULT_SECRET");
    assert_eq!(config.admin.token_env, "MG_ADMIN_TOKEN");
    assert!(config.tenancy.default_organization_id.is_none());
    assert!(config.sync.enabled);
    assert_eq!(config.cache.accessible_providers_ttl_secs, 30);
    assert!(config.storage.persist);
}

#[test]
fn full_file_parses() {
    let toml_str = r#"
[server]
host = "0.0.0.0"
port = 9000

[server.limits]
max_concurrent_requests = 64

[observability]
log_format = "compact"

[vault]
secret_env = "PLATFORM_SECRET"

[upstream]
default_timeout_ms = 30000

[tenancy]
default_organization_id = 7

[sync]
enabled = false

[cache]
accessible_providers_ttl_secs = 0

[storage]
state_path = "/var/lib/modelgate"
persist = false
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.server.limits.max_concurrent_requests, 64);
    assert_eq!(
        config.observability.log_format,
        mg_domain::config::LogFormat::Compact
    );
    assert_eq!(config.vault.secret_env, "PLATFORM_SECRET");
    assert_eq!(config.upstream.default_timeout_ms, 30_000);
    assert_eq!(config.upstream.connect_timeout_ms, 10_000);
    assert_eq!(config.tenancy.default_organization_id, Some(7));
    assert!(!config.sync.enabled);
    assert_eq!(config.cache.accessible_providers_ttl_secs, 0);
    assert_eq!(
        config.storage.state_path,
        std::path::PathBuf::from("/var/lib/modelgate")
    );
    assert!(!config.storage.persist);
}

#[test]
fn default_cors_allows_only_localhost() {
    let config = Config::default();
    assert!(config
        .server
        .cors
        .allowed_origins
        .contains(&"http://localhost:*".to_string()));
    assert!(config
        .server
        .cors
        .allowed_origins
        .contains(&"http://127.0.0.1:*".to_string()));
}

#[test]
fn cors_config_parses_custom_origins() {
    let toml_str = r#"
[server.cors]
allowed_origins = ["https://myapp.com", "http://localhost:3000"]
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.cors.allowed_origins.len(), 2);
    assert!(config
        .server
        .cors
        .allowed_origins
        .contains(&"https://myapp.com".to_string()));
}
