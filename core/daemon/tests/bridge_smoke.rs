use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde_json::Value;
use tempfile::TempDir;

struct DaemonGuard {
    child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

struct Sandbox {
    home: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let home = TempDir::new().expect("Failed to create temp HOME");
        fs::create_dir_all(home.path().join("transcripts")).expect("create transcripts dir");
        fs::create_dir_all(home.path().join("project")).expect("create project dir");
        let sandbox = Self { home };
        sandbox.write_settings();
        sandbox
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.home.path().join(rel)
    }

    fn socket(&self) -> PathBuf {
        self.path("bridge.sock")
    }

    fn status_file(&self) -> PathBuf {
        self.path("status.json")
    }

    fn write_settings(&self) {
        let quoted = |path: PathBuf| serde_json::to_string(&path.to_string_lossy()).unwrap();
        let settings = format!(
            r#"
[memory]
enabled = false

[config]
watch = false

[transcripts]
root = {transcripts}
debounce_ms = 50

[status]
path = {status}
interval_secs = 0.1
"#,
            transcripts = quoted(self.path("transcripts")),
            status = quoted(self.status_file()),
        );
        fs::write(self.path("companion.toml"), settings).expect("write settings");
    }

    fn command(&self) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_companion-daemon"));
        command
            .env("HOME", self.home.path())
            .env("XDG_CONFIG_HOME", self.path("config"))
            .env("COMPANION_SETTINGS", self.path("companion.toml"))
            .env("COMPANION_BRIDGE_SOCKET", self.socket())
            .env_remove("RUST_LOG")
            .env_remove("COMPANION_DEBUG_LOG");
        command
    }

    fn spawn_run(&self) -> DaemonGuard {
        let child = self
            .command()
            .arg("run")
            .arg("--project")
            .arg(self.path("project"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("Failed to spawn companion-daemon");
        DaemonGuard { child }
    }

    fn output(&self, args: &[&str]) -> Output {
        self.command()
            .args(args)
            .output()
            .expect("Failed to run companion-daemon")
    }
}

fn wait_for<T>(timeout: Duration, mut check: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(value) = check() {
            return Some(value);
        }
        sleep(Duration::from_millis(25));
    }
    check()
}

fn read_status(path: &Path) -> Option<Value> {
    let text = fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

fn session<'a>(status: &'a Value, id: &str) -> Option<&'a Value> {
    status["sessions"]["sessions"]
        .as_array()?
        .iter()
        .find(|session| session["session_id"] == id)
}

fn send_lines(socket: &Path, lines: &[&str]) {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to bridge socket");
    for line in lines {
        stream.write_all(line.as_bytes()).expect("write line");
        stream.write_all(b"\n").expect("write newline");
    }
    stream.flush().ok();
}

#[test]
fn bridge_events_reach_published_status() {
    let sandbox = Sandbox::new();
    let _guard = sandbox.spawn_run();

    assert!(
        wait_for(Duration::from_secs(5), || sandbox.socket().exists().then_some(())).is_some(),
        "Timed out waiting for bridge socket"
    );

    send_lines(
        &sandbox.socket(),
        &[
            r#"{"session_id":"s-1","event":"SessionStart","cwd":"/work","pid":4321}"#,
            "{ this is not json",
            r#"{"session_id":"s-1","event":"PreToolUse","tool":"Edit","tool_use_id":"t-1","tool_input":{"file_path":"/work/a.rs"}}"#,
        ],
    );
    send_lines(
        &sandbox.socket(),
        &[r#"{"session_id":"s-2","event":"PostToolUse","tool":"Read"}"#],
    );

    let status = wait_for(Duration::from_secs(5), || {
        let status = read_status(&sandbox.status_file())?;
        let running = session(&status, "s-1")?["phase"] == "running_tool";
        let idle = session(&status, "s-2")?["phase"] == "idle";
        (running && idle).then_some(status)
    })
    .expect("sessions never appeared in status file");

    let s1 = session(&status, "s-1").unwrap();
    assert_eq!(s1["pid"], 4321);
    assert_eq!(s1["source"], "bridge");
    assert_eq!(s1["active_tool"]["target"], "/work/a.rs");
    assert_eq!(status["bridge"]["lines_rejected"], 1);
    assert_eq!(status["memory"]["enabled"], false);
    assert!(status["config"]["resolved"].is_null());
}

#[test]
fn transcript_fallback_feeds_sessions() {
    let sandbox = Sandbox::new();
    let _guard = sandbox.spawn_run();

    assert!(
        wait_for(Duration::from_secs(5), || {
            let status = read_status(&sandbox.status_file())?;
            (status["transcripts"]["watching"] == true).then_some(())
        })
        .is_some(),
        "transcript watcher never started"
    );

    let transcript = sandbox.path("transcripts").join("ses_mined.jsonl");
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&transcript)
        .expect("open transcript");
    writeln!(file, r#"{{"type":"user","sessionId":"mined-1","cwd":"/proj"}}"#).unwrap();
    writeln!(
        file,
        r#"{{"type":"assistant","sessionId":"mined-1","message":{{"content":[{{"type":"tool_use","id":"x","name":"Grep","input":{{"pattern":"fn main"}}}}]}}}}"#
    )
    .unwrap();
    drop(file);

    let status = wait_for(Duration::from_secs(5), || {
        let status = read_status(&sandbox.status_file())?;
        (session(&status, "mined-1")?["phase"] == "running_tool").then_some(status)
    })
    .expect("mined session never appeared");

    let mined = session(&status, "mined-1").unwrap();
    assert_eq!(mined["source"], "transcript");
    assert_eq!(mined["cwd"], "/proj");
    assert_eq!(mined["active_tool"]["name"], "Grep");
}

#[test]
fn sigterm_shuts_down_cleanly() {
    let sandbox = Sandbox::new();
    let mut guard = sandbox.spawn_run();

    assert!(
        wait_for(Duration::from_secs(5), || sandbox.socket().exists().then_some(())).is_some(),
        "Timed out waiting for bridge socket"
    );

    let status = Command::new("kill")
        .arg("-TERM")
        .arg(guard.child.id().to_string())
        .status()
        .expect("send SIGTERM");
    assert!(status.success());

    let exit = wait_for(Duration::from_secs(5), || guard.child.try_wait().ok().flatten())
        .expect("daemon did not exit after SIGTERM");
    assert!(exit.success());
    assert!(!sandbox.socket().exists(), "socket file left behind");
    assert!(!sandbox.status_file().exists(), "status file left behind");
}

#[test]
fn config_command_prints_merged_layers() {
    let sandbox = Sandbox::new();
    let global_dir = sandbox.path("config").join("opencode");
    fs::create_dir_all(&global_dir).unwrap();
    fs::write(
        global_dir.join("opencode.jsonc"),
        r#"{
            // user defaults
            "model": { "provider": "anthropic", "name": "haiku" }
        }"#,
    )
    .unwrap();
    fs::write(
        sandbox.path("project").join("opencode.json"),
        r#"{ "model": { "name": "sonnet" } }"#,
    )
    .unwrap();

    let project = sandbox.path("project");
    let output = sandbox.output(&["config", "--json", "--project", project.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0));

    let value: Value = serde_json::from_slice(&output.stdout).expect("config JSON");
    assert_eq!(value["document"]["model"]["provider"], "anthropic");
    assert_eq!(value["document"]["model"]["name"], "sonnet");
    assert_eq!(value["layers"].as_array().map(Vec::len), Some(2));
    assert_eq!(value["validation"]["ok"], true);
}

#[test]
fn config_command_without_layers_exits_2() {
    let sandbox = Sandbox::new();
    let project = sandbox.path("project");
    let output = sandbox.output(&["config", "--project", project.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn config_command_reports_validation_errors_without_failing() {
    let sandbox = Sandbox::new();
    fs::write(
        sandbox.path("project").join("opencode.json"),
        r#"{ "mcp": { "broken": { "type": "remote" } } }"#,
    )
    .unwrap();

    let project = sandbox.path("project");
    let output = sandbox.output(&["config", "--json", "--project", project.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0));

    let value: Value = serde_json::from_slice(&output.stdout).expect("config JSON");
    assert_eq!(value["validation"]["ok"], false);
    let errors = value["validation"]["errors"].as_array().unwrap();
    assert!(errors
        .iter()
        .any(|e| e.as_str().unwrap_or_default().contains("remote servers require a url")));
}
