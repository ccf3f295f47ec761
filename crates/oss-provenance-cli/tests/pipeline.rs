use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn cli(workdir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("oss-provenance").unwrap();
    cmd.current_dir(workdir)
        .env_remove("USE_LOCAL_LLM")
        .env_remove("LOCAL_MODEL_1")
        .env_remove("LOCAL_MODEL_2")
        .env_remove("OSS_PROVENANCE_GENERATED_DIR")
        .env_remove("OSS_PROVENANCE_DATABASE")
        .env_remove("OSS_PROVENANCE_RESULTS_DIR");
    cmd
}

fn csv_artifacts(dir: &Path, prefix: &str) -> Vec<String> {
    let mut names: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(prefix) && name.ends_with(".csv"))
        .collect();
    names.sort();
    names
}

#[test]
fn aggregate_on_empty_store_succeeds() {
    let temp = tempfile::tempdir().unwrap();
    cli(temp.path())
        .arg("aggregate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Total files analyzed: 0"))
        .stdout(predicate::str::contains("n/a"));
    assert!(temp.path().join("results.sqlite").exists());
}

#[test]
fn similarity_then_detailed_report() {
    let temp = tempfile::tempdir().unwrap();
    let python = temp.path().join("generated/python");
    fs::create_dir_all(&python).unwrap();
    fs::write(python.join("a.py"), "# Copyright 2024 ACME\nprint('a')\n").unwrap();
    fs::write(python.join("b.py"), "print('b')\n").unwrap();

    cli(temp.path())
        .arg("similarity")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 file(s) scored"));

    cli(temp.path())
        .arg("detailed-report")
        .assert()
        .success()
        .stdout(predicate::str::contains("Files analyzed: 2"))
        .stdout(predicate::str::contains("Copyright notice found: 1"))
        .stdout(predicate::str::contains("openai: 1"));

    let results = temp.path().join("results");
    assert_eq!(csv_artifacts(&results, "detailed_issues_").len(), 1);
    assert_eq!(csv_artifacts(&results, "issue_summary_").len(), 1);
    assert_eq!(csv_artifacts(&results, "file_issues_summary_").len(), 1);
}

#[test]
fn settings_file_relocates_paths() {
    let temp = tempfile::tempdir().unwrap();
    let settings = temp.path().join("pipeline.toml");
    fs::write(
        &settings,
        "database = \"state/db.sqlite\"\nresults_dir = \"out\"\n",
    )
    .unwrap();

    cli(temp.path())
        .arg("--config")
        .arg(&settings)
        .arg("aggregate")
        .assert()
        .success();
    assert!(temp.path().join("state/db.sqlite").exists());
}

#[test]
fn import_without_reports_is_not_an_error() {
    let temp = tempfile::tempdir().unwrap();
    cli(temp.path())
        .arg("import-scans")
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 0 report(s)"));
}

#[test]
fn dotenv_selects_local_models() {
    let temp = tempfile::tempdir().unwrap();
    fs::write(
        temp.path().join(".env"),
        "USE_LOCAL_LLM=true\nLOCAL_MODEL_1=starcoder:3b\nLOCAL_MODEL_2=qwen-coder:7b\n",
    )
    .unwrap();
    let python = temp.path().join("generated/python");
    fs::create_dir_all(&python).unwrap();
    fs::write(python.join("a.py"), "print('a')\n").unwrap();
    fs::write(python.join("b.py"), "print('b')\n").unwrap();

    cli(temp.path()).arg("similarity").assert().success();

    cli(temp.path())
        .args(["aggregate", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"model\": \"starcoder:3b\""))
        .stdout(predicate::str::contains("\"model\": \"qwen-coder:7b\""))
        .stdout(predicate::str::contains("\"model\": \"openai\"").not());
}
