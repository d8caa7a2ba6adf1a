//! Plugin executor
//!
//! Handles spawning plugin unit processes and communicating with them, both
//! for `describe` at load time and for every tool call.

use super::protocol::{UnitRequest, UnitResponse};
use super::registry::{Arguments, Invocable};
use crate::error::{LoadError, ToolError};
use async_trait::async_trait;
use serde_json::Value;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// How to start a plugin unit process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    path: PathBuf,
    program: OsString,
    leading_args: Vec<OsString>,
}

impl Launcher {
    /// Run the unit file itself
    pub fn direct(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            program: path.as_os_str().to_os_string(),
            leading_args: vec![],
        }
    }

    /// Run the unit through an interpreter command line, e.g. `python3 -u`
    pub fn interpreted(interpreter: &str, path: &Path) -> Self {
        let mut words = interpreter.split_whitespace().map(OsString::from);
        let program = words.next().unwrap_or_else(|| path.as_os_str().to_os_string());
        let mut leading_args: Vec<OsString> = words.collect();
        leading_args.push(path.as_os_str().to_os_string());

        Self {
            path: path.to_path_buf(),
            program,
            leading_args,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = self.path.parent() {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Run `<unit> describe` and return its stdout
pub async fn describe(launcher: &Launcher, timeout: Duration) -> Result<String, LoadError> {
    let path = launcher.path().to_path_buf();
    let mut cmd = launcher.command(&["describe"]);
    cmd.stdin(Stdio::null());

    let child = cmd.spawn().map_err(|e| LoadError::Spawn {
        path: path.clone(),
        reason: e.to_string(),
    })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| LoadError::DescribeTimeout {
            path: path.clone(),
            timeout,
        })?
        .map_err(|e| LoadError::Spawn {
            path: path.clone(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(LoadError::DescribeFailed {
            path,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Invocable backed by a plugin unit process, one process per call
#[derive(Debug, Clone)]
pub struct ProcessTool {
    tool: String,
    launcher: Launcher,
    timeout: Duration,
}

impl ProcessTool {
    pub fn new(tool: &str, launcher: Launcher, timeout: Duration) -> Self {
        Self {
            tool: tool.to_string(),
            launcher,
            timeout,
        }
    }
}

#[async_trait]
impl Invocable for ProcessTool {
    async fn invoke(&self, arguments: Arguments) -> Result<Value, ToolError> {
        let request = UnitRequest::new(&self.tool, arguments);
        let request_json = serde_json::to_string(&request)
            .map_err(|e| ToolError::Execution(format!("Failed to serialize request: {}", e)))?;

        debug!(
            "Executing plugin {:?} for tool '{}'",
            self.launcher.path(),
            self.tool
        );

        let mut child = self
            .launcher
            .command(&["call", &self.tool])
            .spawn()
            .map_err(|e| ToolError::Execution(format!("Failed to spawn plugin: {}", e)))?;

        let payload = format!("{}\n", request_json);
        let tool = self.tool.as_str();
        // Writing the request and waiting for the answer share one deadline
        let exchange = async move {
            if let Some(mut stdin) = child.stdin.take() {
                // A unit may exit without reading its input; its answer still counts
                if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                    debug!("Failed to write to plugin '{}': {}", tool, e);
                }
            }
            child.wait_with_output().await
        };

        let output = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(output) => output
                .map_err(|e| ToolError::Execution(format!("Failed to read plugin output: {}", e)))?,
            Err(_) => return Err(ToolError::Timeout(self.timeout)),
        };

        read_response(&output, &request.id)
    }
}

/// Pick the unit's answer out of its stdout
fn read_response(output: &Output, request_id: &str) -> Result<Value, ToolError> {
    let stdout = String::from_utf8_lossy(&output.stdout);

    for line in stdout.lines() {
        if let Ok(response) = serde_json::from_str::<UnitResponse>(line.trim()) {
            if response.answers(request_id) {
                return response.into_result();
            }
        }
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(ToolError::Execution(format!(
        "Plugin exited with {} without responding: {}",
        output.status,
        stderr.trim()
    )))
}
