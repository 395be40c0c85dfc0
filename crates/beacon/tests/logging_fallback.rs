use std::fs;
use std::os::unix::fs::PermissionsExt as _;

use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

#[test]
fn logging_does_not_panic_when_beacon_dir_not_writable() {
    let dir = TempDir::new().unwrap();
    let beacon_dir = dir.path().join("beacon-ro");
    fs::create_dir_all(&beacon_dir).unwrap();
    let mut perms = fs::metadata(&beacon_dir).unwrap().permissions();
    perms.set_mode(0o555);
    fs::set_permissions(&beacon_dir, perms).unwrap();

    let mut cmd = cargo_bin_cmd!("bcn");
    cmd.env("BEACON_DIR", &beacon_dir);
    cmd.args(["version"]);
    cmd.assert().success();
}

#[test]
fn log_file_lands_in_beacon_dir() {
    let dir = TempDir::new().unwrap();

    let mut cmd = cargo_bin_cmd!("bcn");
    cmd.env("BEACON_DIR", dir.path());
    cmd.env_remove("RUST_LOG");
    cmd.args(["--log-level", "info", "version"]);
    cmd.assert().success();

    let log = fs::read_to_string(dir.path().join("beacon.log")).unwrap();
    assert!(log.contains("beacon starting"));
}
