//! Starts and supervises the external DPI binary.
//!
//! The child runs in its own process group so it is not co-signalled with
//! this process (e.g. on Ctrl-C). Its stdout is scanned line-by-line for a
//! ready marker before the socket manager is allowed to dial it; stderr is
//! drained concurrently for the life of the process so a chatty child
//! never blocks on a full pipe buffer.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::mpsc;

use crate::config::ClassifierConfig;
use crate::signal::ControlSignal;

const READY_MARKER: &str = "netserver ready";

pub struct ProcessManager {
    config: ClassifierConfig,
    shutdown_requested: AtomicBool,
}

impl ProcessManager {
    pub fn new(config: ClassifierConfig) -> Self {
        ProcessManager {
            config,
            shutdown_requested: AtomicBool::new(false),
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg(&self.config.mode_flag);
        if self.config.local_log {
            cmd.arg("--local-log");
        }
        if self.config.memory_watchdog {
            cmd.arg("--memory-watchdog");
        }
        if self.config.debug {
            cmd.arg("--debug");
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.process_group(0);
        cmd
    }

    /// Spawns the child, waits for its ready line, then runs until it
    /// exits. Returns the signal the caller should act on next:
    /// `DaemonStartup` to relaunch, `DaemonFinished` if shutdown is
    /// in progress. `ready` is the top-level startup's capacity-1 signal
    /// channel for this sub-manager; it is notified once, the first time
    /// the ready line is observed.
    pub async fn run_once(
        self: &Arc<Self>,
        control: mpsc::Sender<ControlSignal>,
        ready: &mpsc::Sender<()>,
    ) -> anyhow::Result<ControlSignal> {
        let mut child = self.build_command().spawn()?;
        let stderr = child.stderr.take().expect("stderr was piped");
        let stderr_task = tokio::spawn(scan_stderr(stderr));

        self.scan_for_ready(&mut child, &control, ready).await?;

        let status = child.wait().await?;
        log::info!("DPI process exited: {status}");
        let _ = stderr_task.await;

        if self.shutdown_requested.load(Ordering::SeqCst) {
            Ok(ControlSignal::DaemonFinished)
        } else {
            Ok(ControlSignal::DaemonStartup)
        }
    }

    async fn scan_for_ready(
        &self,
        child: &mut Child,
        control: &mpsc::Sender<ControlSignal>,
        ready: &mpsc::Sender<()>,
    ) -> anyhow::Result<()> {
        let stdout = child.stdout.take().expect("stdout was piped");
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            log::debug!("dpi stdout: {line}");
            if line.contains(READY_MARKER) {
                let _ = control.send(ControlSignal::SocketConnect).await;
                let _ = ready.try_send(());
                return Ok(());
            }
        }
        anyhow::bail!("DPI process closed stdout before printing its ready line");
    }
}

/// Drains the child's stderr for as long as it's open, logging each line.
/// An unread stderr pipe fills and blocks the child once the kernel buffer
/// is full, so this runs for the whole lifetime of the process, not just
/// during the ready-line scan.
async fn scan_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => log::warn!("dpi stderr: {line}"),
            Ok(None) => break,
            Err(e) => {
                log::debug!("dpi stderr scanner stopped: {e}");
                break;
            }
        }
    }
}
