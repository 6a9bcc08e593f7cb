//! Python sandbox tool.
//!
//! Each call runs in a throwaway temp dir with a cleared environment, a
//! timeout and truncated output. PNG files left in the directory come back
//! as image artifacts.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::{ToolCall, ToolContext, ToolDefinition, ToolReport, check_name, parse_input};
use crate::config::SandboxConfig;
use crate::core::artifacts::{Artifact, ArtifactKind};
use crate::core::events::ToolOutput;

pub const TOOL_NAME: &str = "execute_code";
const SCRIPT_NAME: &str = "main.py";
const MAX_IMAGES: usize = 8;

/// Interpreter settings plus a lazily probed availability status.
#[derive(Debug)]
pub struct SandboxRuntime {
    python: String,
    timeout: Duration,
    max_output_bytes: usize,
    probe: OnceCell<Result<String, String>>,
}

impl Default for SandboxRuntime {
    fn default() -> Self {
        Self::from_config(&SandboxConfig::default())
    }
}

impl SandboxRuntime {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            python: config.python.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_output_bytes: config.max_output_bytes,
            probe: OnceCell::new(),
        }
    }

    /// Interpreter version, probed once on first use.
    ///
    /// # Errors
    /// Returns the probe failure when the interpreter cannot run.
    pub async fn status(&self) -> Result<&str, &str> {
        self.probe
            .get_or_init(|| async {
                let output = tokio::process::Command::new(&self.python)
                    .args(["-I", "-c", "import sys; print(sys.version.split()[0])"])
                    .stdin(Stdio::null())
                    .kill_on_drop(true)
                    .output()
                    .await;
                match output {
                    Ok(out) if out.status.success() => {
                        let version = String::from_utf8_lossy(&out.stdout).trim().to_string();
                        debug!(python = %self.python, version = %version, "sandbox runtime ready");
                        Ok(version)
                    }
                    Ok(out) => Err(format!(
                        "{} exited with {}",
                        self.python,
                        out.status.code().unwrap_or(-1)
                    )),
                    Err(e) => Err(format!("{} could not be started: {e}", self.python)),
                }
            })
            .await
            .as_ref()
            .map(String::as_str)
            .map_err(String::as_str)
    }
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_NAME.to_string(),
        description: "Run a Python script in an isolated sandbox. Returns stdout, stderr and \
            exit code. Save matplotlib figures as .png files in the working directory to \
            return them as images."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Python source to execute"
                },
                "title": {
                    "type": "string",
                    "description": "Short label for the code artifact"
                }
            },
            "required": ["code"],
            "additionalProperties": false
        }),
    }
}

#[derive(Debug, Deserialize)]
struct ExecuteCodeInput {
    code: String,
    #[serde(default)]
    title: Option<String>,
}

struct RunOutput {
    stdout: String,
    stderr: String,
    exit_code: i32,
    timed_out: bool,
    stdout_truncated: bool,
    stderr_truncated: bool,
    images: Vec<(String, Vec<u8>)>,
}

pub async fn execute(call: ToolCall, ctx: ToolContext) -> ToolReport {
    if let Err(report) = check_name(&call, TOOL_NAME) {
        return report;
    }
    let input: ExecuteCodeInput = match parse_input(&call) {
        Ok(input) => input,
        Err(report) => return report,
    };
    if input.code.trim().is_empty() {
        return ToolReport::failure("invalid_input", "code cannot be empty", None);
    }

    let runtime = &ctx.services.sandbox;
    if let Err(reason) = runtime.status().await {
        return ToolReport::failure(
            "sandbox_unavailable",
            "Python sandbox is not available",
            Some(reason.to_string()),
        );
    }

    let code_artifact = Artifact::new(
        ArtifactKind::Code,
        json!({"language": "python", "code": input.code}),
    )
    .titled(input.title.as_deref().unwrap_or("Python"))
    .input();

    let run = match run_script(runtime, &input.code).await {
        Ok(run) => run,
        Err(report) => return report.with_artifact(code_artifact),
    };

    let image_names: Vec<&str> = run.images.iter().map(|(name, _)| name.as_str()).collect();
    let payload = json!({
        "stdout": run.stdout,
        "stderr": run.stderr,
        "exit_code": run.exit_code,
        "timed_out": run.timed_out,
        "stdout_truncated": run.stdout_truncated,
        "stderr_truncated": run.stderr_truncated,
        "images": image_names,
    });
    let output = if run.timed_out {
        ToolOutput::failure_with_details(
            "timeout",
            format!("Execution timed out after {} seconds", runtime.timeout.as_secs()),
            payload.to_string(),
        )
    } else if run.exit_code != 0 {
        ToolOutput::failure_with_details(
            "exec_error",
            format!("Python exited with code {}", run.exit_code),
            payload.to_string(),
        )
    } else {
        ToolOutput::success(payload)
    };

    let mut report = ToolReport::new(output).with_artifact(code_artifact);
    if !run.stdout.is_empty() || !run.stderr.is_empty() {
        report = report.with_artifact(
            Artifact::new(
                ArtifactKind::Code,
                json!({
                    "language": "text",
                    "stdout": run.stdout,
                    "stderr": run.stderr,
                    "exit_code": run.exit_code,
                }),
            )
            .titled("Output"),
        );
    }
    let engine = base64::engine::general_purpose::STANDARD;
    for (name, bytes) in &run.images {
        report = report.with_artifact(
            Artifact::new(
                ArtifactKind::Image,
                json!({"filename": name, "b64": engine.encode(bytes)}),
            )
            .titled(name.clone())
            .mime("image/png"),
        );
    }
    report
}

async fn run_script(runtime: &SandboxRuntime, code: &str) -> Result<RunOutput, ToolReport> {
    let workdir = tempfile::TempDir::new().map_err(|e| {
        ToolReport::failure("sandbox_error", "Failed to create sandbox directory", Some(e.to_string()))
    })?;
    tokio::fs::write(workdir.path().join(SCRIPT_NAME), code)
        .await
        .map_err(|e| {
            ToolReport::failure("sandbox_error", "Failed to write script", Some(e.to_string()))
        })?;

    let mut command = tokio::process::Command::new(&runtime.python);
    command
        .arg("-I")
        .arg(SCRIPT_NAME)
        .current_dir(workdir.path())
        .env_clear()
        .env("HOME", workdir.path())
        .env("MPLBACKEND", "Agg")
        .env("PYTHONDONTWRITEBYTECODE", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(path) = std::env::var_os("PATH") {
        command.env("PATH", path);
    }

    let child = command.spawn().map_err(|e| {
        ToolReport::failure("spawn_error", "Failed to start Python", Some(e.to_string()))
    })?;

    let output = match tokio::time::timeout(runtime.timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| {
            ToolReport::failure("exec_error", "Failed to run Python", Some(e.to_string()))
        })?,
        Err(_) => {
            warn!(timeout_secs = runtime.timeout.as_secs(), "sandbox run timed out");
            return Ok(RunOutput {
                stdout: String::new(),
                stderr: format!(
                    "Execution timed out after {} seconds",
                    runtime.timeout.as_secs()
                ),
                exit_code: -1,
                timed_out: true,
                stdout_truncated: false,
                stderr_truncated: false,
                images: Vec::new(),
            });
        }
    };

    let (stdout, stdout_truncated) =
        truncate_at_utf8_boundary(&output.stdout, runtime.max_output_bytes);
    let (stderr, stderr_truncated) =
        truncate_at_utf8_boundary(&output.stderr, runtime.max_output_bytes);
    let images = collect_images(workdir.path()).await;

    Ok(RunOutput {
        stdout,
        stderr,
        exit_code: output.status.code().unwrap_or(-1),
        timed_out: false,
        stdout_truncated,
        stderr_truncated,
        images,
    })
}

async fn collect_images(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return Vec::new();
    };
    let mut names = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if Path::new(&name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
        {
            names.push(name);
        }
    }
    names.sort();
    names.truncate(MAX_IMAGES);

    let mut images = Vec::new();
    for name in names {
        if let Ok(bytes) = tokio::fs::read(dir.join(&name)).await {
            images.push((name, bytes));
        }
    }
    images
}

/// Truncates at a UTF-8 character boundary. Returns the text and whether
/// anything was cut.
fn truncate_at_utf8_boundary(bytes: &[u8], max_bytes: usize) -> (String, bool) {
    if bytes.len() <= max_bytes {
        return (String::from_utf8_lossy(bytes).into_owned(), false);
    }
    let mut end = max_bytes;
    // Back off continuation bytes (10xxxxxx) so no character is split.
    while end > 0 && (bytes[end] & 0xC0) == 0x80 {
        end -= 1;
    }
    (String::from_utf8_lossy(&bytes[..end]).into_owned(), true)
}
