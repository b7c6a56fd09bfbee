//! The command vocabulary the four sub-managers use to signal each other.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// The DPI process printed its ready line; the socket manager should
    /// dial it.
    SocketConnect,
    /// The DPI process exited and should be relaunched.
    DaemonStartup,
    /// The DPI process exited during shutdown; no relaunch follows.
    DaemonFinished,
    /// Top-level shutdown request.
    SystemShutdown,
}
