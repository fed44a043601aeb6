use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use assert_matches::assert_matches;

use kira_align_pipeline::config::{Config, ConfigLoader, RunConfig, RunMode, RunOptions};
use kira_align_pipeline::error::PipelineError;

fn options(base: PathBuf) -> RunOptions {
    RunOptions {
        base_dir: Some(base),
        project: Some("run1".to_string()),
        ..RunOptions::default()
    }
}

#[test]
fn load_config_from_explicit_path() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("pipeline.json");
    fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "threads": 12,
            "default_reference": "genome/hg38.fa",
            "aligner": {"program": "/opt/minimap2/minimap2", "preset": "map-hifi"},
            "samtools": {"program": "/opt/samtools/bin/samtools"},
            "timeout_secs": 3600,
            "barcode_pattern": "^bc[0-9]+$"
        }"#,
    )
    .unwrap();

    let file = ConfigLoader::resolve(Some(&path)).unwrap();
    let config = RunConfig::resolve(options(temp.path().to_path_buf()), file).unwrap();

    assert_eq!(config.threads, 12);
    assert_eq!(config.default_reference, PathBuf::from("genome/hg38.fa"));
    assert_eq!(config.engines.aligner_preset, "map-hifi");
    assert_eq!(
        config.engines.samtools_program,
        Some(PathBuf::from("/opt/samtools/bin/samtools"))
    );
    assert_eq!(config.timeout, Some(Duration::from_secs(3600)));
    assert!(config.barcode_pattern.matches("bc07"));
    assert!(!config.barcode_pattern.matches("barcode07"));
    assert_matches!(config.mode, Some(RunMode::OneProject(ref name)) if name.as_str() == "run1");
}

#[test]
fn missing_or_broken_config_file_is_a_config_error() {
    let temp = tempfile::tempdir().unwrap();
    let missing = temp.path().join("absent.json");
    let err = ConfigLoader::resolve(Some(&missing)).unwrap_err();
    assert_matches!(err, PipelineError::ConfigRead(_));
    assert!(err.is_config());

    let broken = temp.path().join("broken.json");
    fs::write(&broken, "{ threads: ").unwrap();
    let err = ConfigLoader::resolve(Some(&broken)).unwrap_err();
    assert_matches!(err, PipelineError::ConfigParse(_));
    assert!(err.is_config());
}

#[test]
fn non_positive_threads_are_rejected_before_any_work() {
    let temp = tempfile::tempdir().unwrap();
    for raw in ["0", "-1"] {
        let mut opts = options(temp.path().to_path_buf());
        opts.threads = Some(raw.to_string());
        let err = RunConfig::resolve(opts, Config::default()).unwrap_err();
        assert_matches!(err, PipelineError::InvalidThreads(ref value) if value == raw);
        assert!(err.is_config());
    }

    let file = Config {
        threads: Some(0),
        ..Config::default()
    };
    assert_matches!(
        RunConfig::resolve(options(temp.path().to_path_buf()), file),
        Err(PipelineError::InvalidThreads(_))
    );
}

#[test]
fn base_dir_must_exist() {
    let temp = tempfile::tempdir().unwrap();
    let err = RunConfig::resolve(options(temp.path().join("nope")), Config::default()).unwrap_err();
    assert_matches!(err, PipelineError::MissingBaseDir(_));
    assert!(err.is_config());
}

#[test]
fn invalid_barcode_pattern_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let file = Config {
        barcode_pattern: Some("barcode(".to_string()),
        ..Config::default()
    };
    assert_matches!(
        RunConfig::resolve(options(temp.path().to_path_buf()), file),
        Err(PipelineError::InvalidPattern(_))
    );
}

#[test]
fn zero_timeout_means_no_timeout() {
    let temp = tempfile::tempdir().unwrap();
    let mut opts = options(temp.path().to_path_buf());
    opts.timeout_secs = Some(0);
    let config = RunConfig::resolve(opts, Config::default()).unwrap();
    assert!(config.timeout.is_none());
}
