//! Settings loading, saving and validation against real files.

use std::fs;

use slotbench::config::{loader, BenchSettings, BoardSettings, OptionalCheck, SettingsManager};
use slotbench::error::ConfigError;
use slotbench::models::Peripheral;
use tempfile::TempDir;

#[test]
fn test_missing_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let settings = SettingsManager::load(&dir.path().join("bench.json")).unwrap();
    assert_eq!(settings, BenchSettings::default());
}

#[test]
fn test_partial_file_fills_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bench.json");
    fs::write(
        &path,
        r#"{ "slots_per_bank": 2, "parallel": false, "boards": [ { "programmer_serial": "440123456", "dut_numbers": [11, 12] } ] }"#,
    )
    .unwrap();

    let settings = SettingsManager::load(&path).unwrap();
    assert_eq!(settings.slots_per_bank, 2);
    assert!(!settings.parallel);
    assert_eq!(settings.settle_delay_ms, 1000);
    assert_eq!(settings.voltage.lower, 70_000);
    assert!(settings.boards[0].enabled);
    assert_eq!(settings.boards[0].dut_numbers, vec![11, 12]);
}

#[test]
fn test_garbage_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bench.json");
    fs::write(&path, "{ not json").unwrap();

    assert_eq!(SettingsManager::load(&path).unwrap(), BenchSettings::default());
    assert!(matches!(
        loader::load_settings_from_file(&path),
        Err(ConfigError::InvalidJson(_))
    ));
}

#[test]
fn test_invalid_settings_are_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bench.json");
    fs::write(&path, r#"{ "radio": { "enabled": false, "gating": true } }"#).unwrap();

    assert!(matches!(
        SettingsManager::load(&path),
        Err(ConfigError::ConflictDetected(_))
    ));
}

#[test]
fn test_save_and_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("bench.json");
    let settings = BenchSettings {
        radio: OptionalCheck::informative(),
        boards: vec![
            BoardSettings {
                programmer_serial: "SN-A".to_string(),
                ..BoardSettings::default()
            },
            BoardSettings {
                enabled: false,
                programmer_serial: "SN-B".to_string(),
                ..BoardSettings::default()
            },
        ],
        ..BenchSettings::default()
    };

    SettingsManager::save(&settings, &path).unwrap();
    let loaded = SettingsManager::load(&path).unwrap();

    assert_eq!(loaded, settings);
    assert_eq!(loaded.enabled_boards().count(), 1);
    assert!(loaded.enabled_peripherals().contains(&Peripheral::Radio));
}

#[test]
fn test_save_rejects_mismatched_numbering() {
    let dir = TempDir::new().unwrap();
    let settings = BenchSettings {
        boards: vec![BoardSettings {
            dut_numbers: vec![1, 2],
            ..BoardSettings::default()
        }],
        ..BenchSettings::default()
    };

    let result = SettingsManager::save(&settings, &dir.path().join("bench.json"));
    assert!(matches!(result, Err(ConfigError::ValidationFailed(_))));
    assert!(!dir.path().join("bench.json").exists());
}
