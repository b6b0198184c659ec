//! External tool command wrapper utilities
//!
//! Every transformation and probe shells out to a system binary (ffmpeg,
//! exiftool, file, ImageMagick `convert`, unoconv). Commands run through
//! `tokio::process` so a slow tool never blocks the runtime.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Error, Clone)]
pub enum ToolError {
    #[error("{0} not found in system PATH")]
    NotInstalled(String),

    #[error("{tool} execution failed: {stderr}")]
    ExecutionFailed { tool: String, stderr: String },

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("Image codec error: {0}")]
    Codec(String),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::Io(Arc::new(err))
    }
}

/// Binaries the cache shells out to. Defaults resolve on `PATH`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub ffmpeg: String,
    pub exiftool: String,
    pub file: String,
    pub convert: String,
    pub unoconv: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            exiftool: "exiftool".to_string(),
            file: "file".to_string(),
            convert: "convert".to_string(),
            unoconv: "unoconv".to_string(),
        }
    }
}

impl ToolPaths {
    /// Query every configured tool for its version string.
    ///
    /// Missing tools are reported with `None`; the cache still starts, and
    /// pipelines depending on them fail per job.
    pub async fn discover(&self) -> Vec<(String, Option<String>)> {
        let checks: [(&str, &[&str]); 5] = [
            (&self.ffmpeg, &["-version"]),
            (&self.exiftool, &["-ver"]),
            (&self.file, &["--version"]),
            (&self.convert, &["-version"]),
            (&self.unoconv, &["--version"]),
        ];

        let mut found = Vec::with_capacity(checks.len());
        for (program, args) in checks {
            let version = match ToolCommand::new(program).args(args).execute().await {
                Ok(output) => {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    let line = stdout.lines().next().unwrap_or_default().trim().to_string();
                    info!("Found {} version {}", program, line);
                    Some(line)
                }
                Err(e) => {
                    warn!("Failed to initialize {}, is it installed? ({})", program, e);
                    None
                }
            };
            found.push((program.to_string(), version));
        }
        found
    }
}

/// Render `path` as a command line argument that no tool can read as an option.
pub fn tool_path(path: &Path) -> String {
    if path.is_relative() && path.as_os_str().to_string_lossy().starts_with('-') {
        Path::new(".").join(path).display().to_string()
    } else {
        path.display().to_string()
    }
}

pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    /// ffmpeg-style `-i <path>` input.
    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push("-i".to_string());
        self.args.push(tool_path(path.as_ref()));
        self
    }

    pub fn output(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(tool_path(path.as_ref()));
        self
    }

    /// Positional path argument (ImageMagick/unoconv inputs).
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(tool_path(path.as_ref()));
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub async fn execute(self) -> Result<Output, ToolError> {
        debug!("exec: {} {}", self.program, self.args.join(" "));

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(ref dir) = self.cwd {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ToolError::NotInstalled(self.program.clone()),
            _ => ToolError::from(e),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolError::ExecutionFailed {
                tool: self.program,
                stderr: stderr.chars().take(2000).collect(),
            });
        }

        Ok(output)
    }

    /// Run and parse stdout as JSON (exiftool `-j`, ffprobe `-print_format json`).
    pub async fn execute_json(self) -> Result<serde_json::Value, ToolError> {
        let output = self.execute().await?;
        serde_json::from_slice(&output.stdout)
            .map_err(|e| ToolError::InvalidOutput(format!("JSON parse error: {}", e)))
    }
}
