//! [`ContainerRuntime`] backed by the `docker` command-line client.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, warn};

use crate::error::{SandboxError, SandboxResult};
use crate::frame::{StreamKind, encode_frame};
use crate::runtime::{ContainerRuntime, OutputStream};
use crate::spec::ContainerSpec;

/// Environment passed through to the docker client. Everything else is
/// cleared so host secrets never reach it.
const CLIENT_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "DOCKER_HOST",
    "DOCKER_CONFIG",
    "DOCKER_CONTEXT",
    "DOCKER_CERT_PATH",
    "DOCKER_TLS_VERIFY",
    "XDG_RUNTIME_DIR",
];

const PIPE_BUFFER: usize = 8 * 1024;
const DUPLEX_CAPACITY: usize = 64 * 1024;
const NANOS_PER_CPU: u64 = 1_000_000_000;

/// Drives the docker CLI through `tokio::process`.
#[derive(Debug, Clone)]
pub struct DockerCliRuntime {
    binary: PathBuf,
}

impl DockerCliRuntime {
    /// Locate `binary` on `PATH` (or use it as given if it is a path).
    ///
    /// # Errors
    ///
    /// [`SandboxError::RuntimeUnavailable`] if the binary cannot be found.
    pub fn new(binary: &str) -> SandboxResult<Self> {
        let binary = which::which(binary)
            .map_err(|e| SandboxError::RuntimeUnavailable(format!("{binary}: {e}")))?;
        Ok(Self { binary })
    }

    /// Use the binary at `path` without looking it up.
    #[must_use]
    pub fn with_binary_path(path: impl Into<PathBuf>) -> Self {
        Self {
            binary: path.into(),
        }
    }

    /// Path of the client binary.
    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.env_clear();
        for var in CLIENT_ENV_VARS {
            if let Ok(value) = std::env::var(var) {
                cmd.env(var, value);
            }
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn output(&self, operation: &'static str, args: &[String]) -> SandboxResult<Output> {
        debug!(operation, args = ?args, "docker");
        self.command()
            .args(args)
            .output()
            .await
            .map_err(|e| SandboxError::runtime(operation, e.to_string()))
    }

    async fn run(&self, operation: &'static str, args: &[String]) -> SandboxResult<String> {
        let output = self.output(operation, args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
        } else {
            Err(SandboxError::runtime(operation, stderr_of(&output)))
        }
    }

    /// Arguments for `docker create`.
    #[must_use]
    pub fn create_args(spec: &ContainerSpec, seccomp_path: &Path) -> Vec<String> {
        let hc = &spec.host_config;
        let mut args: Vec<String> = vec![
            "create".into(),
            "--name".into(),
            spec.name.clone(),
            "--user".into(),
            spec.user.clone(),
            "--workdir".into(),
            spec.working_dir.clone(),
            "--network".into(),
            hc.network_mode.clone(),
            "--ipc".into(),
            hc.ipc_mode.clone(),
            "--memory".into(),
            hc.memory_bytes.to_string(),
            "--memory-swap".into(),
            hc.memory_swap_bytes.to_string(),
            "--cpus".into(),
            format_cpus(hc.nano_cpus),
            "--pids-limit".into(),
            hc.pids_limit.to_string(),
            "--security-opt".into(),
            format!("seccomp={}", seccomp_path.display()),
        ];
        if hc.read_only_rootfs {
            args.push("--read-only".into());
        }
        for cap in &hc.cap_drop {
            args.extend(["--cap-drop".into(), cap.clone()]);
        }
        for opt in &hc.security_opt {
            args.extend(["--security-opt".into(), opt.clone()]);
        }
        for bind in &hc.binds {
            args.extend(["--volume".into(), bind.to_volume_arg()]);
        }
        for (key, value) in &spec.labels {
            args.extend(["--label".into(), format!("{key}={value}")]);
        }
        for (key, value) in &spec.env {
            args.extend(["--env".into(), format!("{key}={value}")]);
        }
        if spec.open_stdin {
            args.push("--interactive".into());
        }
        args.push(spec.image.clone());
        args.extend(spec.cmd.iter().cloned());
        args
    }
}

fn stderr_of(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
    if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        stderr
    }
}

fn format_cpus(nano_cpus: u64) -> String {
    let whole = nano_cpus.checked_div(NANOS_PER_CPU).unwrap_or(0);
    let frac = nano_cpus.checked_rem(NANOS_PER_CPU).unwrap_or(0);
    format!("{whole}.{frac:09}")
}

/// Parse the memory half of `docker stats` `MemUsage`, e.g. `12.5MiB / 512MiB`.
#[must_use]
pub fn parse_mem_usage(text: &str) -> Option<u64> {
    let used = text.split('/').next()?.trim();
    let split = used
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(used.len());
    let (number, unit) = used.split_at(split);
    let value: f64 = number.trim().parse().ok()?;
    let multiplier: f64 = match unit.trim() {
        "" | "B" => 1.0,
        "kB" | "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "KiB" => 1024.0,
        "MiB" => 1_048_576.0,
        "GiB" => 1_073_741_824.0,
        "TiB" => 1_099_511_627_776.0,
        _ => return None,
    };
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some((value * multiplier).round() as u64)
}

/// Copy both pipes into `sink` as frames until both close, then reap the
/// client process.
async fn pump(
    mut child: Child,
    mut stdout: ChildStdout,
    mut stderr: ChildStderr,
    mut sink: DuplexStream,
) {
    let mut out_buf = vec![0u8; PIPE_BUFFER];
    let mut err_buf = vec![0u8; PIPE_BUFFER];
    let mut out_open = true;
    let mut err_open = true;

    while out_open || err_open {
        let (stream, read) = tokio::select! {
            r = stdout.read(&mut out_buf), if out_open => (StreamKind::Stdout, r),
            r = stderr.read(&mut err_buf), if err_open => (StreamKind::Stderr, r),
            else => break,
        };
        match read {
            Ok(0) | Err(_) => match stream {
                StreamKind::Stdout => out_open = false,
                StreamKind::Stderr => err_open = false,
            },
            Ok(n) => {
                let chunk = match stream {
                    StreamKind::Stdout => &out_buf[..n],
                    StreamKind::Stderr => &err_buf[..n],
                };
                let Ok(frame) = encode_frame(stream, chunk) else {
                    break;
                };
                if sink.write_all(&frame).await.is_err() {
                    // Reader went away; stop forwarding.
                    break;
                }
            },
        }
    }

    drop(sink);
    if let Err(e) = child.wait().await {
        debug!(error = %e, "docker start client did not exit cleanly");
    }
}

#[async_trait]
impl ContainerRuntime for DockerCliRuntime {
    async fn ping(&self) -> SandboxResult<()> {
        let args: Vec<String> = vec![
            "version".into(),
            "--format".into(),
            "{{.Server.Version}}".into(),
        ];
        self.run("ping", &args)
            .await
            .map(|version| debug!(version, "Docker daemon reachable"))
            .map_err(|e| SandboxError::RuntimeUnavailable(e.to_string()))
    }

    async fn image_exists(&self, image: &str) -> SandboxResult<bool> {
        let args: Vec<String> = vec![
            "image".into(),
            "inspect".into(),
            "--format".into(),
            "{{.Id}}".into(),
            image.to_owned(),
        ];
        Ok(self.output("image_exists", &args).await?.status.success())
    }

    async fn pull_image(&self, image: &str) -> SandboxResult<()> {
        let args: Vec<String> = vec!["pull".into(), "--quiet".into(), image.to_owned()];
        self.run("pull_image", &args)
            .await
            .map(|_| ())
            .map_err(|e| SandboxError::ImagePull {
                image: image.to_owned(),
                reason: e.to_string(),
            })
    }

    async fn create(&self, spec: &ContainerSpec) -> SandboxResult<String> {
        let mut profile = tempfile::Builder::new()
            .prefix("warden-seccomp-")
            .suffix(".json")
            .tempfile()?;
        profile.write_all(spec.host_config.seccomp_profile.as_bytes())?;
        profile.flush()?;

        let args = Self::create_args(spec, profile.path());
        let id = self.run("create", &args).await?;
        // The daemon reads the profile at create time.
        drop(profile);
        if id.is_empty() {
            return Err(SandboxError::runtime("create", "no container id returned"));
        }
        Ok(id)
    }

    async fn start_attached(
        &self,
        id: &str,
        stdin: Option<Vec<u8>>,
    ) -> SandboxResult<OutputStream> {
        let mut cmd = self.command();
        cmd.args(["start", "--attach"]);
        if stdin.is_some() {
            cmd.arg("--interactive").stdin(Stdio::piped());
        }
        cmd.arg(id);

        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::runtime("start", e.to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::runtime("start", "stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::runtime("start", "stderr was not captured"))?;

        if let Some(input) = stdin {
            let mut pipe = child
                .stdin
                .take()
                .ok_or_else(|| SandboxError::runtime("start", "stdin was not captured"))?;
            tokio::spawn(async move { feed_stdin(&mut pipe, &input).await });
        }

        let (writer, reader) = tokio::io::duplex(DUPLEX_CAPACITY);
        tokio::spawn(pump(child, stdout, stderr, writer));
        Ok(Box::new(reader))
    }

    async fn wait(&self, id: &str) -> SandboxResult<i64> {
        let out = self.run("wait", &["wait".into(), id.to_owned()]).await?;
        out.lines()
            .last()
            .unwrap_or_default()
            .trim()
            .parse()
            .map_err(|_| SandboxError::runtime("wait", format!("unexpected exit status '{out}'")))
    }

    async fn stats(&self, id: &str) -> SandboxResult<Option<u64>> {
        let args: Vec<String> = vec![
            "stats".into(),
            "--no-stream".into(),
            "--format".into(),
            "{{.MemUsage}}".into(),
            id.to_owned(),
        ];
        let out = self.run("stats", &args).await?;
        Ok(parse_mem_usage(&out))
    }

    async fn kill(&self, id: &str) -> SandboxResult<()> {
        let output = self
            .output("kill", &["kill".into(), id.to_owned()])
            .await?;
        let stderr = stderr_of(&output);
        if output.status.success() || stderr.contains("is not running") {
            Ok(())
        } else {
            warn!(container = id, error = %stderr, "docker kill failed");
            Err(SandboxError::runtime("kill", stderr))
        }
    }

    async fn remove(&self, id: &str) -> SandboxResult<()> {
        let output = self
            .output("remove", &["rm".into(), "--force".into(), id.to_owned()])
            .await?;
        let stderr = stderr_of(&output);
        if output.status.success() || stderr.contains("No such container") {
            Ok(())
        } else {
            Err(SandboxError::runtime("remove", stderr))
        }
    }
}

/// Write the container's stdin, then close it so the process sees EOF.
async fn feed_stdin<W: AsyncWrite + Unpin>(pipe: &mut W, input: &[u8]) {
    if let Err(e) = pipe.write_all(input).await {
        debug!(error = %e, "Failed to write container stdin");
    }
    if let Err(e) = pipe.shutdown().await {
        debug!(error = %e, "Failed to close container stdin");
    }
}
