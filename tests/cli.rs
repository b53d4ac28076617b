mod common;

use assert_cmd::Command;
use common::TestWorkspace;
use predicates::str::contains;

fn cmd() -> Command {
    Command::cargo_bin("dataset-managed").expect("binary exists")
}

#[test]
fn full_lifecycle_via_the_cli() {
    let workspace = TestWorkspace::new();
    let store = workspace.store_path();
    let store_arg = store.to_str().unwrap();
    let data_v1 = workspace.write("data_v1.csv", common::data_csv_v1());
    let meta_v1 = workspace.write("meta_v1.json", common::extract_v1());

    cmd()
        .args([
            "import",
            "-t",
            "Pupil absence",
            "-d",
            data_v1.to_str().unwrap(),
            "-m",
            meta_v1.to_str().unwrap(),
            "--store",
            store_arg,
        ])
        .assert()
        .success()
        .stdout(contains("Imported 'Pupil absence' version 1.0.0"));

    cmd()
        .args(["status", "--store", store_arg])
        .assert()
        .success()
        .stdout(contains("draft"));

    cmd()
        .args(["publish", "-t", "Pupil absence", "--store", store_arg])
        .assert()
        .success()
        .stdout(contains("Published 'Pupil absence' version 1.0.0"));

    let data_v2 = workspace.write("data_v2.csv", common::data_csv_v2());
    let meta_v2 = workspace.write("meta_v2.json", common::extract_v2());
    cmd()
        .args([
            "next",
            "-t",
            "Pupil absence",
            "-d",
            data_v2.to_str().unwrap(),
            "-m",
            meta_v2.to_str().unwrap(),
            "--store",
            store_arg,
        ])
        .assert()
        .success()
        .stdout(contains("awaiting manual mapping review"))
        .stdout(contains("auto-none"));

    cmd()
        .args([
            "map",
            "-t",
            "Pupil absence",
            "--dimension",
            "filter",
            "--group",
            "characteristic",
            "--source-key",
            "FSM",
            "--candidate-key",
            "Ever FSM",
            "--store",
            store_arg,
        ])
        .assert()
        .success()
        .stdout(contains("filters complete: true"))
        .stdout(contains("next version 1.1.0"));

    cmd()
        .args(["complete", "-t", "Pupil absence", "--store", store_arg])
        .assert()
        .success()
        .stdout(contains("completed with"))
        .stdout(contains("Ever FSM"));

    cmd()
        .args(["changes", "-t", "Pupil absence", "--store", store_arg])
        .assert()
        .success()
        .stdout(contains("time period"))
        .stdout(contains("added"));
}

#[test]
fn importing_a_duplicate_title_fails() {
    let workspace = TestWorkspace::new();
    let store = workspace.store_path();
    let data = workspace.write("data.csv", common::data_csv_v1());
    let meta = workspace.write("meta.json", common::extract_v1());

    let import = |title: &str| {
        cmd()
            .args([
                "import",
                "-t",
                title,
                "-d",
                data.to_str().unwrap(),
                "-m",
                meta.to_str().unwrap(),
                "--store",
                store.to_str().unwrap(),
            ])
            .assert()
    };
    import("Duplicated").success();
    import("Duplicated")
        .failure()
        .stderr(contains("already exists"));
}

#[test]
fn next_requires_a_published_version() {
    let workspace = TestWorkspace::new();
    let store = workspace.store_path();
    let data = workspace.write("data.csv", common::data_csv_v1());
    let meta = workspace.write("meta.json", common::extract_v1());

    cmd()
        .args([
            "import",
            "-t",
            "Unpublished",
            "-d",
            data.to_str().unwrap(),
            "-m",
            meta.to_str().unwrap(),
            "--store",
            store.to_str().unwrap(),
        ])
        .assert()
        .success();

    cmd()
        .args([
            "next",
            "-t",
            "Unpublished",
            "-d",
            data.to_str().unwrap(),
            "-m",
            meta.to_str().unwrap(),
            "--store",
            store.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("no published version"));
}

#[test]
fn mapping_an_unknown_candidate_fails() {
    let workspace = TestWorkspace::new();
    let store = workspace.store_path();
    let store_arg = store.to_str().unwrap();
    let data_v1 = workspace.write("data_v1.csv", common::data_csv_v1());
    let meta_v1 = workspace.write("meta_v1.json", common::extract_v1());
    let data_v2 = workspace.write("data_v2.csv", common::data_csv_v2());
    let meta_v2 = workspace.write("meta_v2.json", common::extract_v2());

    cmd()
        .args([
            "import",
            "-t",
            "Guarded",
            "-d",
            data_v1.to_str().unwrap(),
            "-m",
            meta_v1.to_str().unwrap(),
            "--store",
            store_arg,
        ])
        .assert()
        .success();
    cmd()
        .args(["publish", "-t", "Guarded", "--store", store_arg])
        .assert()
        .success();
    cmd()
        .args([
            "next",
            "-t",
            "Guarded",
            "-d",
            data_v2.to_str().unwrap(),
            "-m",
            meta_v2.to_str().unwrap(),
            "--store",
            store_arg,
        ])
        .assert()
        .success();

    cmd()
        .args([
            "map",
            "-t",
            "Guarded",
            "--dimension",
            "filter",
            "--group",
            "characteristic",
            "--source-key",
            "FSM",
            "--candidate-key",
            "Nonexistent",
            "--store",
            store_arg,
        ])
        .assert()
        .failure()
        .stderr(contains("No candidate"));
}
