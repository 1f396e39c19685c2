//! Gateway that shells out to an external segmentation program
//!
//! The default invocation matches the `rembg` CLI, which writes an RGBA
//! cut-out whose alpha channel is the foreground mask.

use crate::{
    error::{RefineError, Result},
    gateway::SegmentationGateway,
    types::AlphaMask,
};
use async_trait::async_trait;
use instant::Instant;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Default external program
pub const DEFAULT_PROGRAM: &str = "rembg";
/// Default segmentation model
pub const DEFAULT_MODEL: &str = "u2net";
/// Default limit for one segmentation run
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

const INPUT_PLACEHOLDER: &str = "{input}";
const OUTPUT_PLACEHOLDER: &str = "{output}";
const MODEL_PLACEHOLDER: &str = "{model}";

/// Runs `program args...` with `{input}`, `{output}` and `{model}`
/// substituted, then reads the mask from `{output}`
#[derive(Debug, Clone)]
pub struct CommandGateway {
    program: String,
    args: Vec<String>,
    model_id: String,
    timeout: Duration,
}

impl CommandGateway {
    /// Create a gateway for an arbitrary program
    pub fn new<S: Into<String>>(program: S, args: Vec<String>, model_id: S) -> Self {
        Self {
            program: program.into(),
            args,
            model_id: model_id.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// `rembg i -m <model> <input> <output>`
    pub fn rembg<S: Into<String>>(model_id: S) -> Self {
        let args = ["i", "-m", MODEL_PLACEHOLDER, INPUT_PLACEHOLDER, OUTPUT_PLACEHOLDER]
            .iter()
            .map(ToString::to_string)
            .collect();
        Self::new(DEFAULT_PROGRAM.to_string(), args, model_id.into())
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Argument template before substitution
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Arguments with placeholders filled in
    #[must_use]
    pub fn render_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(INPUT_PLACEHOLDER, &input)
                    .replace(OUTPUT_PLACEHOLDER, &output)
                    .replace(MODEL_PLACEHOLDER, &self.model_id)
            })
            .collect()
    }
}

#[async_trait]
impl SegmentationGateway for CommandGateway {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    #[instrument(skip(self, image_bytes), fields(program = %self.program, model = %self.model_id, bytes = image_bytes.len()))]
    async fn segment(&self, image_bytes: &[u8]) -> Result<AlphaMask> {
        let workdir = tempfile::tempdir().map_err(|e| {
            RefineError::segmentation(format!("Failed to create working directory: {}", e))
        })?;

        let extension = image::guess_format(image_bytes)
            .ok()
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or("png");
        let input_path = workdir.path().join(format!("input.{}", extension));
        let output_path = workdir.path().join("mask.png");

        tokio::fs::write(&input_path, image_bytes)
            .await
            .map_err(|e| {
                RefineError::segmentation(format!("Failed to stage input for '{}': {}", self.program, e))
            })?;

        let args = self.render_args(&input_path, &output_path);
        debug!(args = ?args, "Spawning segmentation program");

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RefineError::segmentation(format!("Failed to start '{}': {}", self.program, e))
            })?;

        let started = Instant::now();
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                warn!(timeout_s = self.timeout.as_secs_f64(), "Segmentation program timed out");
                RefineError::segmentation(format!(
                    "'{}' did not finish within {:.1}s",
                    self.program,
                    self.timeout.as_secs_f64()
                ))
            })?
            .map_err(|e| {
                RefineError::segmentation(format!("Failed to wait for '{}': {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RefineError::segmentation(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let mask_bytes = tokio::fs::read(&output_path).await.map_err(|e| {
            RefineError::segmentation(format!(
                "'{}' produced no mask at {}: {}",
                self.program,
                output_path.display(),
                e
            ))
        })?;

        let mask = AlphaMask::from_encoded(&mask_bytes)?;
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            width = mask.dimensions().0,
            height = mask.dimensions().1,
            "Segmentation finished"
        );
        Ok(mask)
    }
}
