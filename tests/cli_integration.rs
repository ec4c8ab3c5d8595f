// CLI integration tests for install/update/load/uninstall flows against a local repository.
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;

fn cmd(home: &Path) -> Command {
    let exe = env!("CARGO_BIN_EXE_exthub");
    let mut command = Command::new(exe);
    command
        .env_remove("EXTHUB_HOME")
        .env_remove("EXTHUB_REPO")
        .env_remove("RUST_LOG")
        .args(["--dir", home.to_str().unwrap()]);
    command
}

fn seed_repo(repo: &Path, name: &str, payload: &[u8]) {
    let version = env!("CARGO_PKG_VERSION");
    let path = repo
        .join(format!("v{version}"))
        .join(exthub::api::platform())
        .join(name)
        .join(format!("lib{name}.exthub_extension"));
    fs::create_dir_all(path.parent().unwrap()).expect("mkdir");
    fs::write(path, payload).expect("write");
}

fn stdout(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).expect("utf8")
}

fn stderr_json(output: &Output) -> Value {
    let text = String::from_utf8_lossy(&output.stderr);
    let line = text
        .lines()
        .find(|line| line.starts_with('{'))
        .expect("json error line");
    serde_json::from_str(line).expect("valid json")
}

#[test]
fn install_then_reinstall_then_update() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = temp.path().join("home");
    let repo = temp.path().join("repo");
    seed_repo(&repo, "httpfs", b"artifact");
    let repo_arg = repo.to_str().unwrap();

    let first = cmd(&home)
        .args(["install", "httpfs", "--from", repo_arg])
        .output()
        .expect("install");
    assert!(first.status.success());
    assert_eq!(
        stdout(&first),
        format!("Extension: httpfs installed from the repo: {repo_arg}.\n")
    );

    let second = cmd(&home)
        .args(["install", "httpfs", "--from", repo_arg])
        .output()
        .expect("reinstall");
    assert!(second.status.success());
    assert_eq!(
        stdout(&second),
        "Extension: httpfs is already installed.\nTo update it, you can run: UPDATE httpfs.\n"
    );

    let update = cmd(&home)
        .args(["update", "httpfs", "--from", repo_arg])
        .output()
        .expect("update");
    assert!(update.status.success());
    assert_eq!(
        stdout(&update),
        format!("Extension: httpfs updated from the repo: {repo_arg}.\n")
    );
}

#[test]
fn default_repo_comes_from_environment() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = temp.path().join("home");
    let repo = temp.path().join("repo");
    seed_repo(&repo, "fts", b"artifact");

    let output = cmd(&home)
        .env("EXTHUB_REPO", &repo)
        .args(["install", "fts", "--json"])
        .output()
        .expect("install");
    assert!(output.status.success());
    let value: Value = serde_json::from_str(stdout(&output).trim()).expect("json");
    assert_eq!(
        value["message"],
        format!("Extension: fts installed from the repo: {}.", repo.display())
    );
}

#[test]
fn piped_version_is_compact_json_even_with_color() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = temp.path().join("home");

    let output = cmd(&home)
        .env("EXTHUB_REPO", "https://mirror.example.org/ext")
        .args(["--color", "always", "version"])
        .output()
        .expect("version");
    assert!(output.status.success());
    let text = stdout(&output);
    assert_eq!(text.lines().count(), 1);
    let value: Value = serde_json::from_str(text.trim()).expect("json");
    assert_eq!(value["name"], "exthub");
    assert_eq!(value["repo"], "https://mirror.example.org/ext");
    assert_eq!(value["home"], home.display().to_string());
}

#[test]
fn missing_extension_exits_not_found() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = temp.path().join("home");
    let repo = temp.path().join("repo");
    fs::create_dir_all(&repo).expect("mkdir");

    let output = cmd(&home)
        .args(["install", "nope", "--from", repo.to_str().unwrap()])
        .output()
        .expect("install");
    assert_eq!(output.status.code().unwrap(), 3);
    assert!(output.stdout.is_empty());
    let err = stderr_json(&output);
    assert_eq!(err["error"]["kind"], "NotFound");
    assert_eq!(err["error"]["extension"], "nope");
}

#[test]
fn load_requires_install_for_official_names() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = temp.path().join("home");

    let output = cmd(&home).args(["load", "httpfs"]).output().expect("load");
    assert_eq!(output.status.code().unwrap(), 3);
    let err = stderr_json(&output);
    assert_eq!(err["error"]["hint"], "Install it first: INSTALL httpfs");
}

#[test]
fn load_rejects_non_library_files() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = temp.path().join("home");
    let path = temp.path().join("libplain.so");
    fs::write(&path, b"not a shared library").expect("write");

    let output = cmd(&home)
        .args(["load", path.to_str().unwrap()])
        .output()
        .expect("load");
    assert_eq!(output.status.code().unwrap(), 6);
    let err = stderr_json(&output);
    assert_eq!(err["error"]["kind"], "Incompatible");
}

#[test]
fn exec_runs_statements_in_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = temp.path().join("home");
    let repo = temp.path().join("repo");
    seed_repo(&repo, "fts", b"artifact");
    let repo_arg = repo.to_str().unwrap();

    let script = format!("INSTALL fts FROM '{repo_arg}'; install fts from '{repo_arg}'; UNINSTALL fts");
    let output = cmd(&home).args(["exec", &script]).output().expect("exec");
    assert!(output.status.success());
    assert_eq!(
        stdout(&output),
        format!(
            "Extension: fts installed from the repo: {repo_arg}.\n\
             Extension: fts is already installed.\nTo update it, you can run: UPDATE fts.\n\
             Extension: fts has been uninstalled.\n"
        )
    );
}

#[test]
fn exec_stops_at_first_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = temp.path().join("home");
    let repo = temp.path().join("repo");
    seed_repo(&repo, "fts", b"artifact");
    let repo_arg = repo.to_str().unwrap();

    let script = format!("INSTALL fts FROM '{repo_arg}'; UNINSTALL vector; UNINSTALL fts");
    let output = cmd(&home).args(["exec", &script]).output().expect("exec");
    assert_eq!(output.status.code().unwrap(), 3);
    assert_eq!(
        stdout(&output),
        format!("Extension: fts installed from the repo: {repo_arg}.\n")
    );

    let list = cmd(&home).args(["list", "--json"]).output().expect("list");
    let value: Value = serde_json::from_str(stdout(&list).trim()).expect("json");
    let fts = value["extensions"]
        .as_array()
        .expect("array")
        .iter()
        .find(|ext| ext["name"] == "fts")
        .expect("fts entry");
    assert_eq!(fts["state"], "installed");
    assert_eq!(fts["official"], true);
}

#[test]
fn malformed_statement_is_usage_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = temp.path().join("home");

    let output = cmd(&home)
        .args(["exec", "INSTALL fts FROM"])
        .output()
        .expect("exec");
    assert_eq!(output.status.code().unwrap(), 2);
    let err = stderr_json(&output);
    assert_eq!(err["error"]["kind"], "Usage");
}
