use phoebus::{DeviceFamily, Settings};
use tempfile::tempdir;

#[test]
fn settings_file_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("inverter.yaml");

    let mut settings = Settings::new("192.168.1.50", DeviceFamily::ThreePhase);
    settings.poll_interval_secs = 10;
    settings.reconnect_after_failures = 3;
    settings.save_to_file(&path).unwrap();

    let loaded = Settings::from_file(&path).unwrap();
    assert_eq!(loaded.host, "192.168.1.50");
    assert_eq!(loaded.family, DeviceFamily::ThreePhase);
    assert_eq!(loaded.poll_interval_secs, 10);
    assert_eq!(loaded.reconnect_after_failures, 3);
    assert!(loaded.validate().is_ok());
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("does-not-exist.yaml");
    assert!(Settings::from_file(&path).is_err());
}

#[test]
fn malformed_yaml_is_an_error() {
    assert!(Settings::from_yaml("host: [unclosed").is_err());
    // Missing the mandatory family selector
    assert!(Settings::from_yaml("host: 10.0.0.9\n").is_err());
}

#[test]
fn unknown_family_is_rejected() {
    let yaml = "host: 10.0.0.9\nfamily: dual_string\n";
    assert!(Settings::from_yaml(yaml).is_err());
}

#[test]
fn validation_rejects_zero_interval_from_file() {
    let yaml = "host: 10.0.0.9\nfamily: single_string\npoll_interval_secs: 0\n";
    let settings = Settings::from_yaml(yaml).unwrap();
    let err = settings.validate().unwrap_err();
    assert!(format!("{}", err).contains("poll_interval_secs"));
}
