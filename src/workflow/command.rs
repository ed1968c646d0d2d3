//! Workflow node running an external program.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::WorkflowNode;
use crate::error::GraphError;

/// Maximum number of stderr bytes kept in a failure report.
const STDERR_TAIL_BYTES: usize = 2048;

/// A node that spawns a program and succeeds when it exits with status 0.
#[derive(Debug, Clone)]
pub struct CommandNode {
    name: String,
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandNode {
    /// Creates a node running `program` with no arguments.
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
            timeout: None,
        }
    }

    /// Appends an argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable for the child process.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the working directory of the child process.
    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Kills the child process if it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Program to run.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments passed to the program.
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl WorkflowNode for CommandNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self) -> Result<(), GraphError> {
        let start = Instant::now();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        if let Some(dir) = &self.current_dir {
            tokio::fs::create_dir_all(dir).await?;
            cmd.current_dir(dir);
        }

        debug!("Spawning {} {:?} for node '{}'", self.program, self.args, self.name);

        let child = cmd.spawn().map_err(|source| GraphError::Spawn {
            node: self.name.clone(),
            source,
        })?;

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_| GraphError::Timeout {
                    node: self.name.clone(),
                    timeout,
                })??,
            None => child.wait_with_output().await?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail_start = stderr
                .char_indices()
                .map(|(i, _)| i)
                .find(|&i| stderr.len() - i <= STDERR_TAIL_BYTES)
                .unwrap_or(stderr.len());
            return Err(GraphError::NodeFailed {
                node: self.name.clone(),
                code: output.status.code().unwrap_or(-1),
                stderr: stderr[tail_start..].trim().to_string(),
            });
        }

        info!(
            "Node '{}' completed in {:.2}s",
            self.name,
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }
}
