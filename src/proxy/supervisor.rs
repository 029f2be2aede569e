//! Process supervisor for the transient local proxy core
//!
//! One process per verification attempt, bound to one exclusive local
//! port. Readiness is decided by, in order of preference:
//!
//! 1. an active TCP connect to the local port succeeding,
//! 2. a readiness marker in the process output,
//! 3. the process still being alive after the liveness grace period.
//!
//! A fatal marker in the output fails startup immediately, even if a
//! readiness marker follows it. The port must be free before spawning, and
//! the child must still be alive with no fatal output once the settle
//! delay has passed.

use crate::error::SupervisorError;
use crate::proxy::outbound::OutboundDescriptor;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::RegexSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, info, trace, warn};

/// Placeholder in process arguments replaced by the config file path
pub const CONFIG_PLACEHOLDER: &str = "{config}";

/// Output lines meaning the inbound listener is up
static READY_MARKERS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\b(xray|v2ray|v2fly)\b.*\bstarted\b",
        r"(?i)\bserver started\b",
        r"(?i)\blistening\b.*\b(tcp|socks|127\.0\.0\.1)",
        r"(?i)\binbound\b.*\bready\b",
    ])
    .expect("Invalid readiness markers")
});

/// Output lines meaning the process cannot serve
static FATAL_MARKERS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\bfailed to start\b",
        r"(?i)\bfailed to (load|parse|read) config",
        r"(?i)\baddress already in use\b",
        r"(?i)^panic:",
        r"(?i)\[fatal\]|\bfatal error\b",
    ])
    .expect("Invalid fatal markers")
});

/// Signal derived from one line of process output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSignal {
    Ready(String),
    Fatal(String),
}

/// Classify an output line. Fatal markers take precedence.
pub fn classify_line(line: &str) -> Option<OutputSignal> {
    if FATAL_MARKERS.is_match(line) {
        Some(OutputSignal::Fatal(line.trim().to_string()))
    } else if READY_MARKERS.is_match(line) {
        Some(OutputSignal::Ready(line.trim().to_string()))
    } else {
        None
    }
}

/// How the process was judged ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    PortOpen,
    Marker(String),
    Optimistic,
}

/// Handle to one supervised process. Stopping it is idempotent.
#[derive(Debug)]
pub struct ProcessHandle {
    port: u16,
    pid: Option<u32>,
    child: Option<Child>,
    config_path: Option<PathBuf>,
}

impl ProcessHandle {
    /// A handle with no process behind it, for capability implementations
    /// that do not need a child process
    pub fn detached(port: u16) -> Self {
        Self {
            port,
            pid: None,
            child: None,
            config_path: None,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Local address of the proxy inbound
    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
    }

    /// Whether a child process is attached and still running
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn remove_config(&mut self) {
        if let Some(path) = self.config_path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                trace!("Could not remove {:?}: {}", path, e);
            }
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // child is spawned with kill_on_drop
        self.remove_config();
    }
}

/// Starts and stops the local proxy process for a descriptor
#[async_trait]
pub trait Supervisor: Send + Sync {
    async fn start(
        &self,
        descriptor: &OutboundDescriptor,
        port: u16,
    ) -> Result<ProcessHandle, SupervisorError>;

    /// Best-effort teardown. Never fails, safe to call repeatedly.
    async fn stop(&self, handle: &mut ProcessHandle);
}

/// Configuration for the process supervisor
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Proxy core executable
    pub program: PathBuf,
    /// Arguments; `{config}` is replaced with the config file path
    pub args: Vec<String>,
    /// Directory for per-port config files
    pub work_dir: PathBuf,
    /// Maximum wait for readiness
    pub startup_timeout: Duration,
    /// Delay after readiness before the first probe
    pub settle_delay: Duration,
    /// Silence after which a live process is optimistically ready
    pub liveness_grace: Option<Duration>,
    /// Wait between graceful termination and a forced kill
    pub teardown_grace: Duration,
    /// First delay between port connect attempts
    pub connect_backoff: Duration,
    /// Upper bound for the connect backoff
    pub connect_backoff_max: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("xray"),
            args: vec!["run".to_string(), "-c".to_string(), CONFIG_PLACEHOLDER.to_string()],
            work_dir: std::env::temp_dir(),
            startup_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_millis(500),
            liveness_grace: Some(Duration::from_secs(3)),
            teardown_grace: Duration::from_secs(2),
            connect_backoff: Duration::from_millis(50),
            connect_backoff_max: Duration::from_millis(800),
        }
    }
}

impl SupervisorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, program: PathBuf) -> Self {
        self.program = program;
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_work_dir(mut self, dir: PathBuf) -> Self {
        self.work_dir = dir;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_liveness_grace(mut self, grace: Option<Duration>) -> Self {
        self.liveness_grace = grace;
        self
    }

    pub fn with_teardown_grace(mut self, grace: Duration) -> Self {
        self.teardown_grace = grace;
        self
    }
}

/// Supervisor spawning an xray-compatible core per port
#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor {
    config: SupervisorConfig,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    fn config_path(&self, port: u16) -> PathBuf {
        self.config
            .work_dir
            .join(format!("proxy-verify-{}-{}.json", std::process::id(), port))
    }

    fn spawn(&self, config_path: &Path) -> Result<Child, SupervisorError> {
        let path = config_path.to_string_lossy();
        let mut cmd = Command::new(&self.config.program);
        cmd.args(
            self.config
                .args
                .iter()
                .map(|arg| arg.replace(CONFIG_PLACEHOLDER, &path)),
        )
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        cmd.spawn().map_err(|e| {
            SupervisorError::Spawn(format!("{}: {}", self.config.program.display(), e))
        })
    }

    async fn await_ready(
        &self,
        handle: &mut ProcessHandle,
        signals: &mut mpsc::Receiver<OutputSignal>,
    ) -> Result<Readiness, SupervisorError> {
        let port = handle.port;
        let deadline = sleep_until(Instant::now() + self.config.startup_timeout);
        tokio::pin!(deadline);

        let grace = self.config.liveness_grace;
        let grace_timer = sleep(grace.unwrap_or(self.config.startup_timeout));
        tokio::pin!(grace_timer);
        let mut grace_pending = grace.is_some();

        let mut backoff = self.config.connect_backoff;
        let connect_timer = sleep(backoff);
        tokio::pin!(connect_timer);

        let mut output_open = true;

        loop {
            tokio::select! {
                biased;

                signal = signals.recv(), if output_open => match signal {
                    Some(OutputSignal::Fatal(line)) => {
                        return Err(SupervisorError::FatalProcess(line));
                    }
                    Some(OutputSignal::Ready(line)) => return Ok(Readiness::Marker(line)),
                    None => output_open = false,
                },

                _ = &mut deadline => {
                    return Err(SupervisorError::StartupTimeout(self.config.startup_timeout));
                }

                _ = &mut connect_timer => {
                    if let Some(status) = exit_status(handle) {
                        return Err(exited(status));
                    }
                    if port_accepts(port).await {
                        // output queued while connecting still wins
                        check_alive(handle, signals)?;
                        return Ok(Readiness::PortOpen);
                    }
                    backoff = (backoff * 2).min(self.config.connect_backoff_max);
                    connect_timer.as_mut().reset(Instant::now() + backoff);
                }

                _ = &mut grace_timer, if grace_pending => {
                    grace_pending = false;
                    if handle.is_running() {
                        return Ok(Readiness::Optimistic);
                    }
                    if let Some(status) = exit_status(handle) {
                        return Err(exited(status));
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Supervisor for ProcessSupervisor {
    async fn start(
        &self,
        descriptor: &OutboundDescriptor,
        port: u16,
    ) -> Result<ProcessHandle, SupervisorError> {
        // a listener already on the port would answer for the new process
        if port_accepts(port).await {
            warn!("Port {} already accepts connections, not starting", port);
            return Err(SupervisorError::PortInUse(port));
        }

        let config_path = self.config_path(port);
        let document = serde_json::to_vec_pretty(&descriptor.process_config(port))
            .map_err(|e| SupervisorError::Spawn(e.to_string()))?;
        tokio::fs::write(&config_path, document)
            .await
            .map_err(|e| SupervisorError::Spawn(format!("{:?}: {}", config_path, e)))?;

        let mut handle = ProcessHandle {
            port,
            pid: None,
            child: None,
            config_path: Some(config_path.clone()),
        };

        let mut child = self.spawn(&config_path)?;
        handle.pid = child.id();

        let (tx, mut rx) = mpsc::channel(16);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, tx));
        }
        handle.child = Some(child);

        debug!(
            "Spawned {} (pid {:?}) for {} on port {}",
            self.config.program.display(),
            handle.pid,
            descriptor.server(),
            port
        );

        let ready = match self.await_ready(&mut handle, &mut rx).await {
            Ok(readiness) => {
                debug!("Process on port {} ready ({:?})", port, readiness);
                sleep(self.config.settle_delay).await;
                check_alive(&mut handle, &mut rx)
            }
            Err(e) => Err(e),
        };

        match ready {
            Ok(()) => Ok(handle),
            Err(e) => {
                warn!("Process on port {} failed to start: {}", port, e);
                self.stop(&mut handle).await;
                Err(e)
            }
        }
    }

    async fn stop(&self, handle: &mut ProcessHandle) {
        let Some(mut child) = handle.child.take() else {
            handle.remove_config();
            return;
        };
        let port = handle.port;

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("Process on port {} already exited: {}", port, status);
                handle.remove_config();
                return;
            }
            Ok(None) => {}
            Err(e) => warn!("Could not poll process on port {}: {}", port, e),
        }

        request_termination(&mut child);

        match timeout(self.config.teardown_grace, child.wait()).await {
            Ok(Ok(status)) => debug!("Process on port {} stopped: {}", port, status),
            Ok(Err(e)) => warn!("Waiting for process on port {} failed: {}", port, e),
            Err(_) => {
                info!(
                    "Process on port {} ignored termination for {:?}, killing",
                    port, self.config.teardown_grace
                );
                if let Err(e) = child.kill().await {
                    warn!("Could not kill process on port {}: {}", port, e);
                }
            }
        }

        handle.remove_config();
    }
}

async fn forward_output<R>(stream: R, tx: mpsc::Sender<OutputSignal>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    // keep draining after the receiver is gone so the pipe never fills
    while let Ok(Some(line)) = lines.next_line().await {
        trace!(target: "proxy_verify::process_output", "{}", line);
        if let Some(signal) = classify_line(&line) {
            let _ = tx.send(signal).await;
        }
    }
}

async fn port_accepts(port: u16) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    matches!(
        timeout(Duration::from_millis(250), TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

fn exit_status(handle: &mut ProcessHandle) -> Option<std::process::ExitStatus> {
    handle.child.as_mut().and_then(|child| child.try_wait().ok().flatten())
}

fn exited(status: std::process::ExitStatus) -> SupervisorError {
    SupervisorError::FatalProcess(format!("process exited during startup: {}", status))
}

/// Fail on any fatal line already received or if the child has exited
fn check_alive(
    handle: &mut ProcessHandle,
    signals: &mut mpsc::Receiver<OutputSignal>,
) -> Result<(), SupervisorError> {
    while let Ok(signal) = signals.try_recv() {
        if let OutputSignal::Fatal(line) = signal {
            return Err(SupervisorError::FatalProcess(line));
        }
    }
    match exit_status(handle) {
        Some(status) => Err(exited(status)),
        None => Ok(()),
    }
}

#[cfg(unix)]
fn request_termination(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        #[allow(clippy::cast_possible_wrap)]
        let pid = Pid::from_raw(pid as i32);
        if let Err(e) = kill(pid, Signal::SIGTERM) {
            debug!("SIGTERM to {} failed: {}", pid, e);
        }
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!("Termination request failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::outbound::{OutboundSynthesizer, XraySynthesizer};

    #[test]
    fn test_classify_ready_lines() {
        assert!(matches!(
            classify_line("Xray 1.8.24 (Xray, Penetrates Everything.) started"),
            Some(OutputSignal::Ready(_))
        ));
        assert!(matches!(
            classify_line("2024/01/01 [Info] transport/internet/tcp: listening TCP on 127.0.0.1:20000"),
            Some(OutputSignal::Ready(_))
        ));
        assert!(classify_line("[Info] app/dispatcher: taking detour").is_none());
    }

    #[test]
    fn test_fatal_takes_precedence() {
        assert!(matches!(
            classify_line("Failed to start: main: failed to load config files"),
            Some(OutputSignal::Fatal(_))
        ));
        assert!(matches!(
            classify_line("listen tcp 127.0.0.1:20000: bind: address already in use"),
            Some(OutputSignal::Fatal(_))
        ));
        assert!(matches!(
            classify_line("panic: runtime error: invalid memory address"),
            Some(OutputSignal::Fatal(_))
        ));
    }

    #[test]
    fn test_detached_handle() {
        let mut handle = ProcessHandle::detached(20005);
        assert_eq!(handle.port(), 20005);
        assert_eq!(handle.local_addr().to_string(), "127.0.0.1:20005");
        assert!(!handle.is_running());
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        fn descriptor() -> OutboundDescriptor {
            XraySynthesizer::new()
                .synthesize("socks5://10.0.0.1:1080")
                .unwrap()
        }

        fn sh(script: &str) -> SupervisorConfig {
            SupervisorConfig::new()
                .with_program(PathBuf::from("sh"))
                .with_args(vec!["-c".to_string(), script.to_string()])
                .with_startup_timeout(Duration::from_secs(3))
                .with_settle_delay(Duration::from_millis(10))
                .with_liveness_grace(None)
                .with_teardown_grace(Duration::from_millis(500))
        }

        // Port 1 is privileged and never bound in test environments, so the
        // active connect probe always fails there.
        const CLOSED_PORT: u16 = 1;

        async fn free_port() -> u16 {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        }

        /// Bind `port` after `delay`, standing in for the child's listener
        fn listen_after(
            port: u16,
            delay: Duration,
        ) -> tokio::task::JoinHandle<tokio::net::TcpListener> {
            tokio::spawn(async move {
                sleep(delay).await;
                tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap()
            })
        }

        #[tokio::test]
        async fn test_ready_on_marker() {
            let supervisor = ProcessSupervisor::new(sh("echo 'Xray 1.8.0 started'; sleep 30"));
            let mut handle = supervisor.start(&descriptor(), CLOSED_PORT).await.unwrap();
            assert!(handle.is_running());
            supervisor.stop(&mut handle).await;
            assert!(!handle.is_running());
        }

        #[tokio::test]
        async fn test_marker_on_stderr() {
            let supervisor =
                ProcessSupervisor::new(sh("echo 'server started' 1>&2; sleep 30"));
            let mut handle = supervisor.start(&descriptor(), CLOSED_PORT).await.unwrap();
            supervisor.stop(&mut handle).await;
        }

        #[tokio::test]
        async fn test_fatal_marker_supersedes_ready() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let dir = tempfile::tempdir().unwrap();
            let pid_file = dir.path().join("pid");
            let supervisor = ProcessSupervisor::new(sh(&format!(
                "echo $$ > {}; echo 'Failed to start: bad config'; echo 'Xray started'; exec sleep 30",
                pid_file.display()
            )));
            let err = supervisor.start(&descriptor(), CLOSED_PORT).await.unwrap_err();
            assert!(matches!(err, SupervisorError::FatalProcess(_)));

            let pid: i32 = std::fs::read_to_string(&pid_file)
                .unwrap()
                .trim()
                .parse()
                .unwrap();
            // reaped by stop, so the pid no longer exists
            assert!(kill(Pid::from_raw(pid), None::<Signal>).is_err());
        }

        #[tokio::test]
        async fn test_startup_timeout() {
            let supervisor = ProcessSupervisor::new(
                sh("sleep 30").with_startup_timeout(Duration::from_millis(400)),
            );
            let err = supervisor.start(&descriptor(), CLOSED_PORT).await.unwrap_err();
            assert_eq!(err, SupervisorError::StartupTimeout(Duration::from_millis(400)));
        }

        #[tokio::test]
        async fn test_optimistic_ready_when_silent_and_alive() {
            let supervisor = ProcessSupervisor::new(
                sh("sleep 30").with_liveness_grace(Some(Duration::from_millis(200))),
            );
            let mut handle = supervisor.start(&descriptor(), CLOSED_PORT).await.unwrap();
            assert!(handle.is_running());
            supervisor.stop(&mut handle).await;
        }

        #[tokio::test]
        async fn test_early_exit_is_fatal() {
            let supervisor = ProcessSupervisor::new(
                sh("exit 3").with_liveness_grace(Some(Duration::from_millis(300))),
            );
            let err = supervisor.start(&descriptor(), CLOSED_PORT).await.unwrap_err();
            assert!(matches!(err, SupervisorError::FatalProcess(_)));
        }

        #[tokio::test]
        async fn test_ready_when_port_accepts() {
            let port = free_port().await;
            let listener = listen_after(port, Duration::from_millis(100));
            let supervisor = ProcessSupervisor::new(sh("sleep 30"));
            let mut handle = supervisor.start(&descriptor(), port).await.unwrap();
            assert_eq!(handle.port(), port);
            assert!(handle.is_running());
            supervisor.stop(&mut handle).await;
            drop(listener.await.unwrap());
        }

        #[tokio::test]
        async fn test_port_held_by_another_listener() {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();

            let supervisor = ProcessSupervisor::new(sh("exit 1"));
            let err = supervisor.start(&descriptor(), port).await.unwrap_err();
            assert_eq!(err, SupervisorError::PortInUse(port));

            let supervisor = ProcessSupervisor::new(sh(
                "sleep 0.2; echo 'listen tcp 127.0.0.1: bind: address already in use'; exit 1",
            ));
            let err = supervisor.start(&descriptor(), port).await.unwrap_err();
            assert_eq!(err, SupervisorError::PortInUse(port));
        }

        #[tokio::test]
        async fn test_exited_child_is_not_ready_when_port_opens() {
            let port = free_port().await;
            let listener = listen_after(port, Duration::from_millis(100));
            let supervisor = ProcessSupervisor::new(sh("exit 1"));
            let err = supervisor.start(&descriptor(), port).await.unwrap_err();
            assert!(matches!(err, SupervisorError::FatalProcess(_)));
            drop(listener.await.unwrap());
        }

        #[tokio::test]
        async fn test_fatal_output_during_settle_fails_start() {
            let port = free_port().await;
            let listener = listen_after(port, Duration::from_millis(50));
            let supervisor = ProcessSupervisor::new(
                sh("sleep 0.2; echo 'listen tcp 127.0.0.1: bind: address already in use'; exit 1")
                    .with_settle_delay(Duration::from_millis(400)),
            );
            let err = supervisor.start(&descriptor(), port).await.unwrap_err();
            assert!(matches!(err, SupervisorError::FatalProcess(_)));
            drop(listener.await.unwrap());
        }

        #[tokio::test]
        async fn test_spawn_failure() {
            let config = sh("").with_program(PathBuf::from("nonexistent_command_12345"));
            let err = ProcessSupervisor::new(config)
                .start(&descriptor(), CLOSED_PORT)
                .await
                .unwrap_err();
            assert!(matches!(err, SupervisorError::Spawn(_)));
        }

        #[tokio::test]
        async fn test_stop_is_idempotent() {
            let supervisor = ProcessSupervisor::new(sh("echo 'Xray started'; sleep 30"));
            let mut handle = supervisor.start(&descriptor(), CLOSED_PORT).await.unwrap();
            supervisor.stop(&mut handle).await;
            supervisor.stop(&mut handle).await;
            assert!(!handle.is_running());
        }

        #[tokio::test]
        async fn test_stop_after_process_exited() {
            let supervisor = ProcessSupervisor::new(sh("echo 'Xray started'; sleep 0.2"));
            let mut handle = supervisor.start(&descriptor(), CLOSED_PORT).await.unwrap();
            tokio::time::sleep(Duration::from_millis(600)).await;
            supervisor.stop(&mut handle).await;
            supervisor.stop(&mut ProcessHandle::detached(CLOSED_PORT)).await;
        }

        #[tokio::test]
        async fn test_stop_kills_process_ignoring_sigterm() {
            let supervisor = ProcessSupervisor::new(sh(
                "trap '' TERM; echo 'Xray started'; while true; do sleep 1; done",
            ));
            let mut handle = supervisor.start(&descriptor(), CLOSED_PORT).await.unwrap();
            supervisor.stop(&mut handle).await;
            assert!(!handle.is_running());
        }

        #[tokio::test]
        async fn test_config_file_written_and_removed() {
            let dir = tempfile::tempdir().unwrap();
            let supervisor = ProcessSupervisor::new(
                sh("echo 'Xray started'; sleep 30").with_work_dir(dir.path().to_path_buf()),
            );
            let mut handle = supervisor.start(&descriptor(), CLOSED_PORT).await.unwrap();
            assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
            supervisor.stop(&mut handle).await;
            assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        }
    }
}
