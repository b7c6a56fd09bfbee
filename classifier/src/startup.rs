//! Wires the process manager, socket manager, and (optionally) the cloud
//! reporter into one supervised unit.
//!
//! Startup: each sub-manager has its own capacity-1 readiness channel, and
//! the three share one control channel for cross-task commands (today, only
//! `SocketConnect`). The top-level `start` waits up to the configured join
//! budget (default 10 s) for each sub-manager's readiness signal in turn,
//! logging a warning and proceeding regardless on a miss — a slow DPI
//! engine should not wedge the daemon's own startup.
//!
//! Shutdown is the mirror: a broadcast `SystemShutdown` tells every
//! sub-manager to wind down, each again given a bounded join budget before
//! the supervisor gives up waiting and logs a warning.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::cloud_reporter::CloudReporter;
use crate::config::ClassifierConfig;
use crate::process_manager::ProcessManager;
use crate::signal::ControlSignal;
use crate::socket_manager::SocketManager;

/// Supervises the DPI process, its socket connection, and the optional
/// cloud reporter as a set of background tasks.
pub struct ClassifierSupervisor {
    process_task: JoinHandle<()>,
    socket_task: JoinHandle<()>,
    cloud_task: Option<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<ControlSignal>,
    join_budget: Duration,
}

impl ClassifierSupervisor {
    /// Spawns all sub-managers and waits up to the configured join budget
    /// for each to confirm readiness, in process/socket/cloud order.
    pub async fn start(
        config: ClassifierConfig,
        socket: Arc<SocketManager>,
        cloud_reporter: Option<Arc<CloudReporter>>,
    ) -> Self {
        let join_budget = Duration::from_secs(config.join_budget_secs);
        let retry_delay = Duration::from_secs(config.retry_delay_secs);

        let (shutdown_tx, _) = broadcast::channel(8);
        let (control_tx, control_rx) = mpsc::channel(1);
        let (process_ready_tx, mut process_ready_rx) = mpsc::channel::<()>(1);
        let (socket_ready_tx, mut socket_ready_rx) = mpsc::channel::<()>(1);
        let (cloud_ready_tx, mut cloud_ready_rx) = mpsc::channel::<()>(1);

        let process_manager = Arc::new(ProcessManager::new(config));

        let process_task = spawn_process_task(process_manager, control_tx, shutdown_tx.subscribe(), process_ready_tx);
        let socket_task = spawn_socket_task(socket, control_rx, retry_delay, shutdown_tx.subscribe(), socket_ready_tx);
        let cloud_task = cloud_reporter.map(|reporter| spawn_cloud_task(reporter, shutdown_tx.subscribe(), cloud_ready_tx));

        if tokio::time::timeout(join_budget, process_ready_rx.recv()).await.is_err() {
            log::warn!("classifier process manager did not confirm ready within the startup budget");
        }
        if tokio::time::timeout(join_budget, socket_ready_rx.recv()).await.is_err() {
            log::warn!("classifier socket manager did not confirm ready within the startup budget");
        }
        if cloud_task.is_some() && tokio::time::timeout(join_budget, cloud_ready_rx.recv()).await.is_err() {
            log::warn!("classifier cloud reporter did not confirm ready within the startup budget");
        }

        ClassifierSupervisor {
            process_task,
            socket_task,
            cloud_task,
            shutdown_tx,
            join_budget,
        }
    }

    /// Broadcasts a shutdown signal and waits for every sub-manager to
    /// finish, up to the configured join budget each. A sub-manager that
    /// misses its budget is logged at warning and left to finish on its
    /// own; the supervisor does not block the caller indefinitely.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(ControlSignal::SystemShutdown);

        if tokio::time::timeout(self.join_budget, self.process_task).await.is_err() {
            log::warn!("process manager did not exit within its join budget");
        }
        if tokio::time::timeout(self.join_budget, self.socket_task).await.is_err() {
            log::warn!("socket manager did not exit within its join budget");
        }
        if let Some(cloud_task) = self.cloud_task {
            if tokio::time::timeout(self.join_budget, cloud_task).await.is_err() {
                log::warn!("cloud reporter did not exit within its join budget");
            }
        }
    }
}

fn spawn_process_task(
    process_manager: Arc<ProcessManager>,
    control_tx: mpsc::Sender<ControlSignal>,
    mut shutdown_rx: broadcast::Receiver<ControlSignal>,
    ready_tx: mpsc::Sender<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                result = process_manager.run_once(control_tx.clone(), &ready_tx) => {
                    match result {
                        Ok(ControlSignal::DaemonFinished) => break,
                        Ok(_) => continue,
                        Err(e) => {
                            log::error!("DPI process manager error: {e:#}");
                            continue;
                        }
                    }
                }
                Ok(ControlSignal::SystemShutdown) = shutdown_rx.recv() => {
                    process_manager.request_shutdown();
                }
            }
        }
    })
}

fn spawn_socket_task(
    socket: Arc<SocketManager>,
    mut control_rx: mpsc::Receiver<ControlSignal>,
    retry_delay: Duration,
    mut shutdown_rx: broadcast::Receiver<ControlSignal>,
    ready_tx: mpsc::Sender<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(ControlSignal::SocketConnect) = control_rx.recv() => {
                    loop {
                        match socket.connect().await {
                            Ok(()) => {
                                let _ = ready_tx.try_send(());
                                break;
                            }
                            Err(e) => {
                                log::warn!("classifier socket connect failed, retrying: {e}");
                                tokio::time::sleep(retry_delay).await;
                            }
                        }
                    }
                }
                Ok(ControlSignal::SystemShutdown) = shutdown_rx.recv() => break,
                else => break,
            }
        }
    })
}

fn spawn_cloud_task(
    reporter: Arc<CloudReporter>,
    mut shutdown_rx: broadcast::Receiver<ControlSignal>,
    ready_tx: mpsc::Sender<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let _ = ready_tx.try_send(());
        let shutdown = async move {
            loop {
                match shutdown_rx.recv().await {
                    Ok(ControlSignal::SystemShutdown) => break,
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
        };
        reporter
            .run(
                |report| {
                    log::info!(
                        "cloud report: session {} application {:?} confidence {}",
                        report.session_id,
                        report.application_guid,
                        report.confidence
                    );
                },
                shutdown,
            )
            .await;
    })
}
