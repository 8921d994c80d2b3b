//! Container-backed execution using Bollard.
//!
//! One throwaway container per compile or run step, created from the
//! language's image with the job workspace bind-mounted at `/workspace`.
//! The container has no network and is capped on memory and CPU.
//! Stdin is written next to the source and redirected in, so input size is
//! not bounded by argv limits.

use super::{ProcessRunner, RawOutput};
use crate::config::LanguageConfigManager;
use crate::toolchain::CommandSpec;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use nix::unistd::{getgid, getuid};
use quizrun_common::types::Language;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const CONTAINER_WORKDIR: &str = "/workspace";
const PIDS_LIMIT: i64 = 64;

/// Run as the host user so compile artifacts in the bind mount stay
/// removable by the workspace manager
fn container_user() -> String {
    format!("{}:{}", getuid(), getgid())
}

/// Container cleanup guard - guarantees container removal on drop,
/// including when the step future is cancelled mid-flight
struct ContainerGuard<'a> {
    docker: &'a Docker,
    container_id: String,
}

impl<'a> Drop for ContainerGuard<'a> {
    fn drop(&mut self) {
        // Drop cannot await; hand removal to the runtime
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            if let Err(e) = docker.remove_container(&container_id, Some(options)).await {
                warn!(container_id = %container_id, error = %e, "Failed to remove container");
            }
        });
    }
}

/// Removes the staged stdin file however the step ends
struct StdinFile(std::path::PathBuf);

impl Drop for StdinFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

pub struct DockerRunner {
    docker: Docker,
    languages: LanguageConfigManager,
    max_output_bytes: usize,
}

impl DockerRunner {
    pub fn new(languages: LanguageConfigManager, max_output_bytes: usize) -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        Ok(Self {
            docker,
            languages,
            max_output_bytes,
        })
    }

    /// Pull the image if it is not cached locally
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = image, "Image cache hit");
            return Ok(());
        }

        warn!(image = image, "Image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull Docker image")?;
        }

        info!(image = image, "Image pulled");
        Ok(())
    }

    /// Collect demultiplexed logs until the container stops, then its exit code
    async fn collect(&self, container_id: &str) -> (String, String, bool, Option<i64>) {
        let cap = self.max_output_bytes;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut truncated = false;

        let logs_options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        });
        let mut logs = self.docker.logs(container_id, logs_options);

        while let Some(chunk) = logs.next().await {
            let (buf, message) = match chunk {
                Ok(LogOutput::StdOut { message }) => (&mut stdout, message),
                Ok(LogOutput::StdErr { message }) => (&mut stderr, message),
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "Error reading container logs");
                    break;
                }
            };
            let room = cap.saturating_sub(buf.len());
            if message.len() > room {
                truncated = true;
            }
            buf.extend_from_slice(&message[..message.len().min(room)]);
        }

        let mut exit_code = None;
        let wait_options = Some(WaitContainerOptions {
            condition: "not-running",
        });
        let mut wait = self.docker.wait_container(container_id, wait_options);
        match wait.next().await {
            Some(Ok(response)) => exit_code = Some(response.status_code),
            // Bollard reports a non-zero exit as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                exit_code = Some(code)
            }
            Some(Err(e)) => warn!(error = %e, "Failed to get container exit code"),
            None => warn!("No wait response from container"),
        }

        (
            String::from_utf8_lossy(&stdout).into_owned(),
            String::from_utf8_lossy(&stderr).into_owned(),
            truncated,
            exit_code,
        )
    }
}

/// Single-quote for `sh -c`
fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

fn shell_join(cmd: &CommandSpec) -> String {
    cmd.to_vec()
        .iter()
        .map(|part| shell_quote(part))
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl ProcessRunner for DockerRunner {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn execute(
        &self,
        language: Language,
        cmd: &CommandSpec,
        work_dir: &Path,
        stdin: &str,
        timeout: Duration,
    ) -> Result<RawOutput> {
        let settings = self.languages.get(language);
        self.ensure_image(&settings.image)
            .await
            .with_context(|| format!("Failed to ensure Docker image '{}' is available", settings.image))?;

        let token = uuid::Uuid::new_v4().simple().to_string();
        let stdin_name = format!(".stdin-{}", token);
        let stdin_path = work_dir.join(&stdin_name);
        tokio::fs::write(&stdin_path, stdin)
            .await
            .context("Failed to stage stdin")?;
        let _stdin_file = StdinFile(stdin_path);

        let script = format!("exec {} < {}", shell_join(cmd), shell_quote(&stdin_name));
        let container_name = format!("quizrun-{}", token);

        let config = Config {
            image: Some(settings.image.clone()),
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), script]),
            entrypoint: Some(vec![]),
            working_dir: Some(CONTAINER_WORKDIR.to_string()),
            user: Some(container_user()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(bollard::models::HostConfig {
                binds: Some(vec![format!("{}:{}", work_dir.display(), CONTAINER_WORKDIR)]),
                memory: Some(self.languages.memory_limit_bytes(language)),
                memory_swap: Some(self.languages.memory_limit_bytes(language)),
                nano_cpus: Some(self.languages.nano_cpus(language)),
                pids_limit: Some(PIDS_LIMIT),
                network_mode: Some("none".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .context("Failed to create Docker container")?;
        let container_id = container.id;
        let _guard = ContainerGuard {
            docker: &self.docker,
            container_id: container_id.clone(),
        };

        let start = Instant::now();
        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start Docker container")?;

        match tokio::time::timeout(timeout, self.collect(&container_id)).await {
            Ok((stdout, stderr, truncated, exit_code)) => Ok(RawOutput {
                stdout,
                stderr,
                exit_code,
                timed_out: false,
                truncated,
                execution_time_ms: start.elapsed().as_millis() as u64,
            }),
            Err(_) => {
                warn!(
                    container_id = %container_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Container timed out - killing"
                );
                if let Err(e) = self
                    .docker
                    .kill_container(&container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(container_id = %container_id, error = %e, "Failed to kill timed-out container");
                }
                Ok(RawOutput {
                    timed_out: true,
                    execution_time_ms: start.elapsed().as_millis() as u64,
                    ..Default::default()
                })
            }
        }
    }
}
