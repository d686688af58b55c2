//! End-to-end tests for the whl-deploy binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use whl_testing::archives::{tar_gz_of, truncated_copy, two_root_tar};
use whl_testing::assertions::assert_trees_equal;
use whl_testing::fixtures::{create_map_tree, create_source_tree};
use whl_testing::TestDir;

fn whl() -> Command {
    let mut cmd = Command::cargo_bin("whl-deploy").unwrap();
    cmd.arg("--quiet");
    cmd
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("whl-deploy")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("unpack"))
        .stdout(predicate::str::contains("import"));
}

#[test]
fn test_pack_then_unpack_with_rename() {
    let test_dir = TestDir::new().unwrap();
    let source = create_source_tree(&test_dir, "apollo-v1").unwrap();
    let archive = test_dir.join("bundle.tar.gz");
    let dest = test_dir.join("opt");

    whl()
        .arg("pack")
        .arg(&source)
        .arg(&archive)
        .assert()
        .success()
        .stdout(predicate::str::contains("bundle.tar.gz"));

    whl()
        .arg("unpack")
        .arg(&archive)
        .arg(&dest)
        .args(["--rename-to", "apollo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("apollo"));

    assert_trees_equal(&source, &dest.join("apollo")).unwrap();
}

#[test]
fn test_pack_rewrites_unknown_suffix() {
    let test_dir = TestDir::new().unwrap();
    let source = create_source_tree(&test_dir, "apollo-v1").unwrap();

    whl()
        .arg("pack")
        .arg(&source)
        .arg(test_dir.join("bundle.foo"))
        .assert()
        .success()
        .stdout(predicate::str::contains("bundle.tar.gz"));

    assert!(test_dir.join("bundle.tar.gz").is_file());
}

#[test]
fn test_pack_help_lists_written_suffixes() {
    whl()
        .args(["pack", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains(".tar.bz2"))
        .stdout(predicate::str::contains(".tgz").not());
}

#[test]
fn test_pack_tgz_written_as_tar_gz() {
    let test_dir = TestDir::new().unwrap();
    let source = create_source_tree(&test_dir, "apollo-v1").unwrap();

    whl()
        .arg("pack")
        .arg(&source)
        .arg(test_dir.join("bundle.tgz"))
        .assert()
        .success()
        .stdout(predicate::str::contains("bundle.tar.gz"));

    assert!(test_dir.join("bundle.tar.gz").is_file());
    assert!(!test_dir.join("bundle.tgz").exists());
}

#[test]
fn test_exit_codes() {
    let test_dir = TestDir::new().unwrap();

    // Missing source
    whl()
        .arg("unpack")
        .arg(test_dir.join("missing.tar"))
        .arg(test_dir.join("dest"))
        .assert()
        .code(2);

    // Not an archive
    let text = test_dir.create_file("notes.tar", b"plain text").unwrap();
    whl()
        .arg("unpack")
        .arg(&text)
        .arg(test_dir.join("dest"))
        .assert()
        .code(3);

    // Ambiguous rename
    let two = two_root_tar(&test_dir.join("two.tar")).unwrap();
    whl()
        .arg("unpack")
        .arg(&two)
        .arg(test_dir.join("dest"))
        .args(["--rename-to", "apollo"])
        .assert()
        .code(3);

    // Truncated
    let maps = create_map_tree(&test_dir, "maps").unwrap();
    let archive = tar_gz_of(&maps, &test_dir.join("maps.tar.gz")).unwrap();
    let cut = truncated_copy(&archive, &test_dir.join("cut.tar.gz")).unwrap();
    whl()
        .arg("unpack")
        .arg(&cut)
        .arg(test_dir.join("dest2"))
        .assert()
        .code(4);

    // Usage
    whl().arg("unpack").assert().code(1);
}

#[test]
fn test_fetch_remote_requires_dest() {
    whl()
        .args(["fetch", "https://example.com/map_data.tar.gz"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--dest"));
}

#[test]
fn test_import_and_export_model() {
    let test_dir = TestDir::new().unwrap();
    let model = create_source_tree(&test_dir, "yolo-v3").unwrap();
    let archive = tar_gz_of(&model, &test_dir.join("model.tar.gz")).unwrap();
    let root = test_dir.join("perception");

    whl()
        .args(["import", "models"])
        .arg(&archive)
        .args(["--name", "yolo", "--root"])
        .arg(&root)
        .assert()
        .success();
    assert_trees_equal(&model, &root.join("yolo")).unwrap();

    // Existing content needs --force
    whl()
        .args(["import", "models"])
        .arg(&archive)
        .args(["--name", "yolo", "--root"])
        .arg(&root)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    fs::write(root.join("yolo/stale.txt"), b"old").unwrap();
    whl()
        .args(["import", "models"])
        .arg(&archive)
        .args(["--name", "yolo", "--force", "--root"])
        .arg(&root)
        .assert()
        .success();
    assert!(!root.join("yolo/stale.txt").exists());

    let output = test_dir.join("exported.zip");
    whl()
        .args(["export", "models", "--name", "yolo", "--root"])
        .arg(&root)
        .arg("--output")
        .arg(&output)
        .assert()
        .success();

    let unpacked = test_dir.join("unpacked");
    whl().arg("unpack").arg(&output).arg(&unpacked).assert().success();
    assert_trees_equal(&model, &unpacked.join("yolo")).unwrap();
}

#[test]
fn test_failed_forced_import_keeps_existing_model() {
    let test_dir = TestDir::new().unwrap();
    let model = create_source_tree(&test_dir, "yolo-v3").unwrap();
    let archive = tar_gz_of(&model, &test_dir.join("model.tar.gz")).unwrap();
    let root = test_dir.join("perception");

    whl()
        .args(["import", "models"])
        .arg(&archive)
        .args(["--name", "yolo", "--root"])
        .arg(&root)
        .assert()
        .success();

    // Not an archive
    let text = test_dir.create_file("broken.tar.gz", b"plain text").unwrap();
    whl()
        .args(["import", "models"])
        .arg(&text)
        .args(["--name", "yolo", "--force", "--root"])
        .arg(&root)
        .assert()
        .code(3);
    assert_trees_equal(&model, &root.join("yolo")).unwrap();

    // Missing source
    whl()
        .args(["import", "models"])
        .arg(test_dir.join("missing.tar.gz"))
        .args(["--name", "yolo", "--force", "--root"])
        .arg(&root)
        .assert()
        .code(2);
    assert_trees_equal(&model, &root.join("yolo")).unwrap();
}

#[test]
fn test_config_show() {
    let test_dir = TestDir::new().unwrap();
    let config = test_dir.create_file("config.toml", b"[archive]\ngzip_level = 9\n").unwrap();

    whl()
        .arg("--config")
        .arg(&config)
        .args(["config", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("gzip_level = 9"))
        .stdout(predicate::str::contains("temp_prefix"));
}
