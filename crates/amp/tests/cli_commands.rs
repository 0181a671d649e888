#![cfg(feature = "cli")]

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Output, Stdio};

struct Server {
    child: Child,
    addr: String,
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn amp() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_amp"));
    cmd.env_remove("AMP_LOG")
        .env_remove("AMP_HOST")
        .env_remove("AMP_USER")
        .env_remove("AMP_SECRET")
        .env_remove("AMP_USERS")
        .env_remove("AMP_LISTEN")
        .arg("--log-level")
        .arg("error");
    cmd
}

fn start_server() -> Server {
    let mut child = amp()
        .args(["--format", "json", "serve", "--listen", "127.0.0.1:0"])
        .args(["--user", "alice=pw", "--cell", "notes"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve should start");

    let stdout = child.stdout.take().expect("stdout should be piped");
    let mut line = String::new();
    BufReader::new(stdout)
        .read_line(&mut line)
        .expect("serve should announce its address");
    let announced: serde_json::Value =
        serde_json::from_str(&line).expect("announcement should be json");
    let addr = announced["listening"]
        .as_str()
        .expect("announcement should carry the address")
        .to_string();
    Server { child, addr }
}

fn client(server: &Server, secret: &str, args: &[&str]) -> Output {
    amp()
        .args(["--format", "json"])
        .args(args)
        .args(["--host", &server.addr, "--user", "alice", "--secret", secret])
        .output()
        .expect("client command should run")
}

fn json_lines(output: &Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line should be json"))
        .collect()
}

#[test]
fn commit_then_pin_replays_state() {
    let server = start_server();

    let output = client(&server, "pw", &["commit", "notes", "--set", "title=hello"]);
    assert!(output.status.success(), "commit failed: {output:?}");
    let committed = json_lines(&output);
    let tid = committed[0]["committed"].as_str().expect("tid should print");
    assert_eq!(tid.len(), 52);

    let output = client(&server, "pw", &["pin", "notes", "--mode", "close-on-sync"]);
    assert!(output.status.success(), "pin failed: {output:?}");
    let msgs = json_lines(&output);
    let statuses: Vec<&str> = msgs.iter().map(|m| m["status"].as_str().unwrap()).collect();
    assert_eq!(statuses, vec!["syncing", "synced", "closed"]);
    assert_eq!(msgs[0]["tid"].as_str(), Some(tid));
    assert_eq!(msgs[0]["ops"][0]["value"].as_str(), Some("hello"));
}

#[test]
fn wrong_secret_exits_with_auth_code() {
    let server = start_server();
    let output = client(&server, "nope", &["pin", "notes"]);
    assert_eq!(output.status.code(), Some(40));
}

#[test]
fn unknown_cell_reports_closed_with_code() {
    let server = start_server();
    let output = client(&server, "pw", &["pin", "missing"]);
    assert_eq!(output.status.code(), Some(1));
    let msgs = json_lines(&output);
    assert_eq!(msgs[0]["err_code"].as_str(), Some("cell_not_found"));
}

#[test]
fn connect_refused_is_failure() {
    let output = amp()
        .args(["pin", "notes", "--host", "127.0.0.1:1", "--user", "a", "--secret", "b"])
        .output()
        .expect("pin should run");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn tid_new_and_inspect_agree() {
    let output = amp()
        .args(["--format", "json", "tid", "new", "--content", "abc"])
        .output()
        .expect("tid new should run");
    assert!(output.status.success());
    let created = &json_lines(&output)[0];
    let tid = created["tid"].as_str().unwrap();

    let output = amp()
        .args(["--format", "json", "tid", "inspect", tid])
        .output()
        .expect("tid inspect should run");
    assert!(output.status.success());
    let inspected = &json_lines(&output)[0];
    assert_eq!(inspected["unix_secs"], created["unix_secs"]);
    assert_eq!(inspected["suffix"], created["suffix"]);
}

#[test]
fn tid_inspect_rejects_garbage() {
    let output = amp()
        .args(["tid", "inspect", "not-a-tid"])
        .output()
        .expect("tid inspect should run");
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn version_reports_crate_version() {
    let output = amp().arg("version").output().expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}
