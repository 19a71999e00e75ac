use super::*;

#[test]
fn defaults_match_spec_values() {
    let cfg = Config::default();
    assert_eq!(cfg.server.port, 5432);
    assert_eq!(cfg.pool.max_connections, 50);
    assert_eq!(cfg.pool.min_connections, 5);
    assert_eq!(cfg.notifications.max_channels, 1000);
    assert_eq!(cfg.notifications.payload_max_length, 8000);
}

#[test]
fn partial_toml_fills_in_remaining_defaults() {
    let toml_src = r#"
        [server]
        port = 6543

        [pool]
        max_connections = 10
    "#;
    let cfg: Config = toml::from_str(toml_src).unwrap();
    assert_eq!(cfg.server.port, 6543);
    assert_eq!(cfg.server.host, Server::default_host());
    assert_eq!(cfg.pool.max_connections, 10);
    assert_eq!(cfg.pool.min_connections, Pool::default_min_connections());
}

#[test]
fn load_reads_an_existing_file_from_disk() {
    use std::io::Write;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "[server]\nport = 7777\n").unwrap();
    let cfg = Config::load(file.path().to_str().unwrap()).unwrap();
    assert_eq!(cfg.server.port, 7777);
}

#[test]
fn load_rejects_malformed_toml() {
    use std::io::Write;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "not = [valid").unwrap();
    let err = Config::load(file.path().to_str().unwrap()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn custom_types_round_trip_through_toml() {
    let toml_src = r#"
        [[custom_types]]
        name = "money_cents"
        oid = 90001
    "#;
    let cfg: Config = toml::from_str(toml_src).unwrap();
    assert_eq!(cfg.custom_types.len(), 1);
    assert_eq!(cfg.custom_types[0].name, "money_cents");
    assert_eq!(cfg.custom_types[0].oid, 90001);
    assert_eq!(cfg.custom_types[0].encode, "text");
}
