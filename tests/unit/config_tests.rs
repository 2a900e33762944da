//! Unit tests for TOML configuration parsing and validation.

use std::time::Duration;

use agent_relay::config::GlobalConfig;
use agent_relay::process::writer::InputFormat;
use agent_relay::AppError;

const MINIMAL: &str = r#"
[process]
executable = "claude"
"#;

#[test]
fn minimal_config_gets_defaults() {
    let config = GlobalConfig::from_toml_str(MINIMAL).expect("valid");
    assert_eq!(config.process.executable, "claude");
    assert!(config.process.args.is_empty());
    assert!(config.process.inherit_env.iter().any(|k| k == "PATH"));
    assert_eq!(config.process.input_format, InputFormat::Text);
    assert_eq!(config.timeouts.startup_seconds, 30);
    assert_eq!(config.timeouts.terminate_grace_seconds, 5);
    assert_eq!(config.query_timeout(), None);
    assert_eq!(config.session.queue_depth, 8);
    assert!(config.session.transcript_dir.is_none());
}

#[test]
fn full_config_round_trips_into_spawn_spec_and_options() {
    let dir = tempfile::tempdir().expect("tempdir");
    let raw = format!(
        r#"
[process]
executable = "agent"
args = ["--output-format", "stream-json"]
cwd = '{}'
inherit_env = ["HOME"]
input_format = "json"

[process.env]
MODE = "relay"

[timeouts]
startup_seconds = 12
terminate_grace_seconds = 2
query_seconds = 90

[session]
queue_depth = 3
"#,
        dir.path().display()
    );
    let config = GlobalConfig::from_toml_str(&raw).expect("valid");

    let spec = config.spawn_spec();
    assert_eq!(spec.program, "agent");
    assert_eq!(spec.args, ["--output-format", "stream-json"]);
    assert_eq!(spec.inherit_env, ["HOME"]);
    assert_eq!(spec.env.get("MODE").map(String::as_str), Some("relay"));
    assert_eq!(
        spec.cwd.as_deref(),
        Some(dir.path().canonicalize().expect("canon").as_path())
    );

    let options = config.session_options();
    assert_eq!(options.startup_timeout, Duration::from_secs(12));
    assert_eq!(options.terminate_grace, Duration::from_secs(2));
    assert_eq!(options.input_format, InputFormat::Json);
    assert_eq!(config.query_timeout(), Some(Duration::from_secs(90)));
}

#[test]
fn rejects_invalid_values() {
    let cases = [
        ("[process]\nexecutable = \"  \"\n", "executable"),
        ("[process]\nexecutable = \"a\"\n[timeouts]\nstartup_seconds = 0\n", "startup_seconds"),
        ("[process]\nexecutable = \"a\"\n[timeouts]\nterminate_grace_seconds = 0\n", "terminate_grace_seconds"),
        ("[process]\nexecutable = \"a\"\n[session]\nqueue_depth = 0\n", "queue_depth"),
        ("[process]\nexecutable = \"a\"\n[session]\nevent_buffer = 16\n", "event_buffer"),
        ("[process]\nexecutable = \"a\"\ncwd = \"/definitely/not/here/8c1f\"\n", "cwd"),
    ];
    for (raw, field) in cases {
        let err = GlobalConfig::from_toml_str(raw).expect_err(field);
        assert!(matches!(err, AppError::Config(_)), "{field}: {err:?}");
        assert!(err.to_string().contains(field), "{field}: {err}");
    }
}

#[test]
fn malformed_toml_is_config_error() {
    let err = GlobalConfig::from_toml_str("[process").expect_err("bad toml");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn missing_process_table_is_rejected() {
    let err = GlobalConfig::from_toml_str("[timeouts]\nstartup_seconds = 1\n").expect_err("no process");
    assert!(err.to_string().starts_with("config:"));
}

#[test]
fn unknown_input_format_is_rejected() {
    let raw = "[process]\nexecutable = \"a\"\ninput_format = \"xml\"\n";
    assert!(GlobalConfig::from_toml_str(raw).is_err());
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("relay.toml");
    std::fs::write(&path, MINIMAL).expect("write");
    let config = GlobalConfig::load_from_path(&path).expect("load");
    assert_eq!(config.process.executable, "claude");

    let err = GlobalConfig::load_from_path(dir.path().join("missing.toml")).expect_err("missing");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn workspace_override_is_canonicalized() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = GlobalConfig::from_toml_str(MINIMAL).expect("valid");
    config.set_workspace(dir.path()).expect("override");
    assert_eq!(
        config.process.cwd,
        Some(dir.path().canonicalize().expect("canon"))
    );
    assert!(config.set_workspace(&dir.path().join("nope")).is_err());
}
