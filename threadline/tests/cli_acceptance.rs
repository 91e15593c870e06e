use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_config,
            xdg_state,
        }
    }

    fn write_config(&self, contents: &str) {
        let dir = self.xdg_config.join("threadline");
        fs::create_dir_all(&dir).expect("failed to create config dir");
        fs::write(dir.join("config.toml"), contents).expect("failed to write config");
    }
}

fn fixture(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../threadline-core/tests/fixtures")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

fn run_bin(env: &CliTestEnv, args: &[&str]) -> Output {
    let mut command = Command::new(PathBuf::from(assert_cmd::cargo::cargo_bin!("threadline")));

    command
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute threadline: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "threadline {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

/// The pretty-printed final message is the last JSON document on stdout
fn final_message(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let start = stdout
        .find("{\n")
        .unwrap_or_else(|| panic!("no pretty JSON in stdout:\n{stdout}"));
    serde_json::from_str(&stdout[start..]).expect("final message should be valid JSON")
}

#[test]
fn replay_prints_accumulated_tool_call() {
    let env = CliTestEnv::new();
    let file = fixture("weather-tool.ndjson");
    let args = ["replay", file.as_str(), "--chunk-size", "5"];

    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let message = final_message(&output);
    assert_eq!(message["role"], "assistant");
    assert_eq!(message["status"]["type"], "requires-action");
    assert_eq!(message["parts"][1]["type"], "tool-call");
    assert_eq!(message["parts"][1]["args"]["city"], "San Francisco");
    assert_eq!(message["parts"][1]["status"]["type"], "requires-action");

    assert!(
        env.xdg_state.join("threadline").exists(),
        "log directory should be created under XDG_STATE_HOME"
    );
}

#[test]
fn replay_strict_fails_on_truncated_file() {
    let env = CliTestEnv::new();
    let file = fixture("truncated.ndjson");

    let output = run_bin(&env, &["replay", file.as_str()]);
    assert!(!output.status.success(), "strict replay should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains(r#"{"type":"part-fin"#),
        "error should name the dangling line, got:\n{stderr}"
    );

    let message = final_message(&output);
    assert_eq!(message["status"]["reason"], "error");
}

#[test]
fn replay_fails_on_error_finish_reason() {
    let env = CliTestEnv::new();
    let file = fixture("finish-error.ndjson");

    let output = run_bin(&env, &["replay", file.as_str()]);
    assert!(
        !output.status.success(),
        "a stream finishing with reason error should fail the replay"
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("stream ended with an error"),
        "unexpected stderr:\n{stderr}"
    );

    let message = final_message(&output);
    assert_eq!(message["status"]["type"], "incomplete");
    assert_eq!(message["status"]["reason"], "error");
    assert_eq!(message["parts"][0]["text"], "partial");
}

#[test]
fn replay_lenient_flag_and_config_drop_truncated_line() {
    let env = CliTestEnv::new();
    let file = fixture("truncated.ndjson");
    let args = ["replay", file.as_str(), "--lenient"];

    let output = run_bin(&env, &args);
    assert_success(&args, &output);
    assert_eq!(final_message(&output)["status"]["type"], "complete");

    env.write_config("[stream]\nallow_incomplete_line_on_flush = true\n");
    let args = ["replay", file.as_str()];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);
}

#[test]
fn replay_snapshots_streams_intermediate_states() {
    let env = CliTestEnv::new();
    let file = fixture("interleaved.ndjson");
    let args = ["replay", file.as_str(), "--snapshots", "--chunk-size", "3"];

    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let snapshot_lines: Vec<serde_json::Value> = stdout
        .lines()
        .take_while(|line| line.starts_with('{') && line.ends_with('}'))
        .map(|line| serde_json::from_str(line).expect("snapshot should be JSON"))
        .collect();

    assert!(snapshot_lines.len() >= 6);
    assert_eq!(snapshot_lines[0]["status"]["type"], "running");

    let message = final_message(&output);
    assert_eq!(message["parts"][0]["partId"], "A");
    assert_eq!(message["parts"][1]["partId"], "B");
}

#[test]
fn replay_rejects_invalid_config() {
    let env = CliTestEnv::new();
    env.write_config("[stream]\nmax_line_bytes = 0\n");
    let file = fixture("component.ndjson");

    let output = run_bin(&env, &["replay", file.as_str()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load configuration"));
}
