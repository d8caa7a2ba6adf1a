//! End-to-end tests driving the toolhost binary over stdio

#![cfg(unix)]

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const MATH_UNIT: &str = r#"case "$1" in
  describe)
    echo '{"functions": [{"name": "add", "doc": "Add two integers.", "returns": "int", "params": [{"name": "a", "annotation": "int"}, {"name": "b", "annotation": "int"}]}]}'
    ;;
  call)
    read line
    a=$(echo "$line" | sed -n 's/.*"a":\([-0-9]*\).*/\1/p')
    b=$(echo "$line" | sed -n 's/.*"b":\([-0-9]*\).*/\1/p')
    echo "{\"success\": true, \"result\": $((a + b))}"
    ;;
esac
"#;

const SLOW_UNIT: &str = r#"case "$1" in
  describe)
    echo '{"functions": [{"name": "wait_forever"}]}'
    ;;
  call)
    sleep 10
    ;;
esac
"#;

/// A server root whose `.sh` units run through `sh`
fn server_root() -> TempDir {
    let root = TempDir::new().unwrap();
    fs::create_dir_all(root.path().join("tool_modules")).unwrap();
    fs::write(
        root.path().join("toolhost.toml"),
        "[plugins]\ntimeout = 10\n\n[plugins.interpreters]\nsh = \"sh\"\n",
    )
    .unwrap();
    root
}

fn add_unit(root: &TempDir, file_name: &str, body: &str) {
    fs::write(root.path().join("tool_modules").join(file_name), body).unwrap();
}

fn toolhost(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("toolhost").unwrap();
    cmd.arg(root)
        .env("XDG_CONFIG_HOME", root)
        .env_remove("RUST_LOG")
        .env_remove("TOOLHOST_PLUGIN_DIR")
        .env_remove("TOOLHOST_TIMEOUT")
        .env_remove("TOOLHOST_SERVER_NAME")
        .timeout(Duration::from_secs(30));
    cmd
}

fn frames(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_list_and_call_add() {
    let root = server_root();
    add_unit(&root, "math.sh", MATH_UNIT);

    let output = toolhost(root.path())
        .write_stdin(concat!(
            "{\"id\": 1, \"operation\": \"list_tools\"}\n",
            "{\"id\": 2, \"operation\": \"call_tool\", \"tool_name\": \"add\", \"arguments\": {\"a\": 2, \"b\": 3}}\n",
        ))
        .assert()
        .success()
        .stderr(predicate::str::contains("Registered tool: add"))
        .get_output()
        .stdout
        .clone();

    let frames = frames(&output);
    assert_eq!(frames.len(), 3);

    let server_name = frames[0]["server_name"].as_str().unwrap();
    assert!(server_name.ends_with("-mcp-server"));
    assert_eq!(frames[0]["server_version"], env!("CARGO_PKG_VERSION"));

    assert_eq!(frames[1]["id"], 1);
    assert_eq!(frames[1]["tools"][0]["name"], "add");
    assert_eq!(frames[1]["tools"][0]["description"], "Add two integers.");

    assert_eq!(frames[2], json!({"id": 2, "status": "success", "result": 5}));
}

#[test]
fn test_broken_unit_does_not_block_others() {
    let root = server_root();
    add_unit(&root, "math.sh", MATH_UNIT);
    add_unit(
        &root,
        "chroma.sh",
        "echo \"ModuleNotFoundError: No module named 'langchain_chroma'\" >&2\nexit 1\n",
    );

    let output = toolhost(root.path())
        .write_stdin("{\"operation\": \"list_tools\"}\n")
        .assert()
        .success()
        .stderr(predicate::str::contains("Error loading module"))
        .get_output()
        .stdout
        .clone();

    let frames = frames(&output);
    let tools = frames[1]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "add");
}

fn speak_unit(description: &str) -> String {
    format!(
        "case \"$1\" in\n  describe)\n    echo '{{\"functions\": [{{\"name\": \"speak\", \"doc\": \"{}\"}}]}}'\n    ;;\nesac\n",
        description
    )
}

#[test]
fn test_name_collision_is_logged_and_later_unit_wins() {
    let root = server_root();
    add_unit(&root, "a_say.sh", &speak_unit("Speak with say."));
    add_unit(&root, "b_espeak.sh", &speak_unit("Speak with espeak."));

    let output = toolhost(root.path())
        .write_stdin("{\"operation\": \"list_tools\"}\n")
        .assert()
        .success()
        .stderr(predicate::str::contains("Tool name collision"))
        .get_output()
        .stdout
        .clone();

    let frames = frames(&output);
    let tools = frames[1]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "speak");
    assert_eq!(tools[0]["description"], "Speak with espeak.");
}

#[test]
fn test_unknown_tool_keeps_serving() {
    let root = server_root();
    add_unit(&root, "math.sh", MATH_UNIT);

    let output = toolhost(root.path())
        .write_stdin(concat!(
            "{\"operation\": \"call_tool\", \"tool_name\": \"nonexistent\", \"arguments\": {}}\n",
            "not even json\n",
            "{\"operation\": \"call_tool\", \"tool_name\": \"add\", \"arguments\": {\"a\": -1, \"b\": 1}}\n",
        ))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let frames = frames(&output);
    assert_eq!(frames.len(), 4);
    assert_eq!(frames[1]["error_kind"], "unknown_tool");
    assert_eq!(frames[1]["error_message"], "Tool 'nonexistent' not found");
    assert_eq!(frames[2]["error_kind"], "invalid_request");
    assert_eq!(frames[3]["result"], 0);
}

#[test]
fn test_missing_plugin_directory_serves_nothing() {
    let root = TempDir::new().unwrap();

    let output = toolhost(root.path())
        .write_stdin("{\"operation\": \"list_tools\"}\n")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    assert_eq!(frames(&output)[1], json!({"tools": []}));
}

#[test]
fn test_call_timeout() {
    let root = server_root();
    add_unit(&root, "slow.sh", SLOW_UNIT);

    let output = toolhost(root.path())
        .args(["--timeout", "1"])
        .write_stdin("{\"operation\": \"call_tool\", \"tool_name\": \"wait_forever\"}\n")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    assert_eq!(frames(&output)[1]["error_kind"], "timeout");
}

#[test]
fn test_server_name_from_env() {
    let root = server_root();

    let output = toolhost(root.path())
        .env("TOOLHOST_SERVER_NAME", "utility-mcp-server")
        .write_stdin("")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    assert_eq!(frames(&output)[0]["server_name"], "utility-mcp-server");
}

#[test]
fn test_plugin_dir_flag() {
    let root = server_root();
    fs::create_dir_all(root.path().join("tools")).unwrap();
    fs::write(root.path().join("tools").join("math.sh"), MATH_UNIT).unwrap();

    let output = toolhost(root.path())
        .args(["--plugin-dir", "tools"])
        .write_stdin("{\"operation\": \"list_tools\"}\n")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    assert_eq!(frames(&output)[1]["tools"][0]["name"], "add");
}

#[test]
fn test_invalid_configuration_fails() {
    let root = server_root();

    toolhost(root.path())
        .args(["--timeout", "0"])
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[test]
fn test_stdout_carries_only_frames() {
    let root = server_root();
    add_unit(&root, "math.sh", MATH_UNIT);

    toolhost(root.path())
        .arg("--debug")
        .write_stdin("{\"operation\": \"list_tools\"}\n")
        .assert()
        .success()
        .stdout(predicate::function(|out: &str| {
            out.lines()
                .all(|line| serde_json::from_str::<Value>(line).is_ok())
        }));
}
