use std::fs;

use chrono::{TimeZone, Utc};
use parenttext_pipeline_core::error::ConfigError;
use parenttext_pipeline_core::meta::{check_pipeline_version, meta_path, read_meta, write_meta, PullMeta};
use parenttext_pipeline_core::PIPELINE_VERSION;
use tempfile::tempdir;

#[test]
fn test_version_gate() {
    struct TestCase {
        config: &'static str,
        running: &'static str,
        accepted: bool,
    }
    let cases = vec![
        TestCase { config: "1.0.0", running: "1.0.0", accepted: true },
        TestCase { config: "1.0", running: "1.2.0", accepted: true },
        TestCase { config: "1", running: "1.9.3", accepted: true },
        TestCase { config: "1.3.0", running: "1.2.0", accepted: false },
        TestCase { config: "2.0.0", running: "1.2.0", accepted: false },
        TestCase { config: "0.9.0", running: "1.2.0", accepted: false },
    ];

    for case in cases {
        let result = check_pipeline_version(case.config, case.running);
        assert_eq!(
            result.is_ok(),
            case.accepted,
            "config {} against running {}: {result:?}",
            case.config,
            case.running
        );
    }
}

#[test]
fn test_version_gate_names_the_failure() {
    assert!(matches!(
        check_pipeline_version("1.3.0", "1.2.0"),
        Err(ConfigError::PipelineTooOld { .. })
    ));
    assert!(matches!(
        check_pipeline_version("0.9.0", "1.2.0"),
        Err(ConfigError::MajorMismatch { .. })
    ));
    assert!(matches!(
        check_pipeline_version("one", "1.2.0"),
        Err(ConfigError::InvalidVersion { .. })
    ));
}

#[test]
fn test_running_version_accepts_its_own_configs() {
    assert!(check_pipeline_version(PIPELINE_VERSION, PIPELINE_VERSION).is_ok());
}

#[test]
fn test_meta_written_then_read_back() {
    let dir = tempdir().unwrap();
    let meta = PullMeta {
        pull_timestamp: Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap(),
        pipeline_version: Some("1.2.0".to_owned()),
        config_version: Some("2024.1".to_owned()),
    };

    write_meta(dir.path(), &meta).unwrap();

    assert!(meta_path(dir.path()).is_file());
    assert_eq!(read_meta(dir.path()), Some(meta));
}

#[test]
fn test_missing_or_corrupt_meta_means_pull_everything() {
    let dir = tempdir().unwrap();
    assert_eq!(read_meta(dir.path()), None);

    fs::write(meta_path(dir.path()), "{\"pull_timestamp\": \"yesterday\"}").unwrap();
    assert_eq!(read_meta(dir.path()), None);
}

#[test]
fn test_meta_with_only_a_timestamp_is_accepted() {
    let dir = tempdir().unwrap();
    fs::write(
        meta_path(dir.path()),
        "{\"pull_timestamp\": \"2024-01-02T03:04:05.678901Z\"}",
    )
    .unwrap();

    let meta = read_meta(dir.path()).expect("timestamp-only meta is valid");
    assert_eq!(meta.pipeline_version, None);
    assert_eq!(meta.pull_timestamp.timestamp(), Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap().timestamp());
}
