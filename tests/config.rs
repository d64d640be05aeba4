use assert_matches::assert_matches;
use tempfile::tempdir;

use grn_hierarchy::config::{Config, ConfigLoader};
use grn_hierarchy::domain::GroupMode;
use grn_hierarchy::error::GenomeError;

#[test]
fn explicit_file_overrides_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("grnh.json");
    std::fs::write(
        &path,
        r#"{"group_mode": "always_main_group", "legacy_fixup": false, "simulation_key": " run-3 ", "pretty": false}"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.schema_version, 1);
    assert_eq!(resolved.group_mode, GroupMode::AlwaysMainGroup);
    assert!(!resolved.legacy_fixup);
    assert!(!resolved.pretty);
    assert_eq!(resolved.simulation_key.as_deref(), Some("run-3"));
    assert_eq!(resolved.origin.as_ref().map(|origin| origin.as_std_path()), Some(path.as_path()));

    let settings = resolved.source_settings();
    assert_eq!(settings.group_mode, GroupMode::AlwaysMainGroup);
    assert_eq!(settings.sim_key.as_deref(), Some("run-3"));
}

#[test]
fn missing_explicit_file_is_a_read_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.json");
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, GenomeError::ConfigRead(reported) if reported == path);
}

#[test]
fn malformed_json_is_a_parse_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("grnh.json");
    std::fs::write(&path, "{ group_mode: ").unwrap();
    assert_matches!(ConfigLoader::resolve(path.to_str()), Err(GenomeError::ConfigParse(_)));
}

#[test]
fn unknown_schema_versions_are_refused() {
    let config = Config {
        schema_version: Some(2),
        ..Config::default()
    };
    let err = ConfigLoader::resolve_config(config).unwrap_err();
    assert_matches!(err, GenomeError::ConfigParse(message) if message.contains("schema_version 2"));
}
