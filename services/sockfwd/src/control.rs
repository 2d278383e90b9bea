//! Out-of-band control: shutdown, stats dump and a reserved hook.
//!
//! Control arrives as a closed set of [`ControlCommand`]s over a channel.
//! [`spawn_signal_listener`] is the Unix adapter that turns process signals
//! into commands:
//!
//! | Signal                    | Command     |
//! |---------------------------|-------------|
//! | SIGINT, SIGTERM, SIGQUIT  | `Shutdown`  |
//! | SIGUSR1                   | `DumpStats` |
//! | SIGUSR2                   | `Reserved`  |

use std::fmt;
use std::io;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::buffer::BufferPool;
use crate::stats::{Stats, StatsSnapshot};

const VERSION: &str = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));

/// Buffered commands before signal delivery applies backpressure.
pub const CONTROL_CHANNEL_CAPACITY: usize = 16;

/// A control instruction delivered outside the data path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Close the listener and exit without draining connections.
    Shutdown,
    /// Log a stats report.
    DumpStats,
    /// Hook for toggling connection logging; currently does nothing.
    Reserved,
}

/// Signal to command mapping used by [`spawn_signal_listener`].
pub fn signal_commands() -> [(SignalKind, ControlCommand); 5] {
    [
        (SignalKind::interrupt(), ControlCommand::Shutdown),
        (SignalKind::terminate(), ControlCommand::Shutdown),
        (SignalKind::quit(), ControlCommand::Shutdown),
        (SignalKind::user_defined1(), ControlCommand::DumpStats),
        (SignalKind::user_defined2(), ControlCommand::Reserved),
    ]
}

/// Install signal handlers and forward each delivery as a command.
///
/// Handlers are registered before this returns, so signals raised
/// afterwards are never lost to the default disposition. The forwarding
/// tasks stop once the receiving side of `commands` is gone.
pub fn spawn_signal_listener(commands: mpsc::Sender<ControlCommand>) -> io::Result<()> {
    let mut streams = Vec::new();
    for (kind, command) in signal_commands() {
        streams.push((signal(kind)?, command));
    }

    for (mut stream, command) in streams {
        let commands = commands.clone();
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                debug!(?command, "Control signal received");
                if commands.send(command).await.is_err() {
                    break;
                }
            }
        });
    }

    Ok(())
}

/// Dispatches control commands against the shared forwarding state.
pub struct ControlHandler {
    stats: Arc<Stats>,
    pool: Arc<BufferPool>,
    shutdown: watch::Sender<bool>,
}

impl ControlHandler {
    pub fn new(stats: Arc<Stats>, pool: Arc<BufferPool>, shutdown: watch::Sender<bool>) -> Self {
        Self {
            stats,
            pool,
            shutdown,
        }
    }

    /// Apply one command. `Break` means the process should exit now.
    pub fn handle(&self, command: ControlCommand) -> ControlFlow<()> {
        match command {
            ControlCommand::Shutdown => {
                self.shutdown.send_replace(true);
                info!("closed listener, shutting down");
                ControlFlow::Break(())
            }
            ControlCommand::DumpStats => {
                let report = self.report();
                info!(
                    open = report.stats.current,
                    total = report.stats.total,
                    alive_tasks = report.alive_tasks,
                    resident_memory_bytes = report.resident_memory_bytes,
                    "{}",
                    report
                );
                ControlFlow::Continue(())
            }
            ControlCommand::Reserved => {
                debug!("Reserved control command, ignoring");
                ControlFlow::Continue(())
            }
        }
    }

    /// Gather the current stats report.
    pub fn report(&self) -> StatsReport {
        let metrics = tokio::runtime::Handle::try_current()
            .ok()
            .map(|handle| handle.metrics());

        StatsReport {
            version: VERSION,
            alive_tasks: metrics.as_ref().map(|m| m.num_alive_tasks()),
            workers: metrics.as_ref().map(|m| m.num_workers()),
            resident_memory_bytes: resident_memory_bytes(),
            pool_idle: self.pool.idle(),
            pool_allocated: self.pool.allocated(),
            stats: self.stats.snapshot(),
        }
    }

    /// Dispatch commands until shutdown.
    ///
    /// A closed channel is treated as shutdown, since nothing could deliver
    /// one afterwards.
    pub async fn run(self, mut commands: mpsc::Receiver<ControlCommand>) {
        while let Some(command) = commands.recv().await {
            if self.handle(command).is_break() {
                return;
            }
        }

        warn!("Control channel closed, shutting down");
        self.handle(ControlCommand::Shutdown);
    }
}

/// Snapshot logged on `DumpStats`.
#[derive(Debug, Clone)]
pub struct StatsReport {
    pub version: &'static str,
    /// Tasks alive in the runtime; `None` outside a runtime.
    pub alive_tasks: Option<usize>,
    pub workers: Option<usize>,
    pub resident_memory_bytes: Option<u64>,
    pub pool_idle: usize,
    pub pool_allocated: usize,
    pub stats: StatsSnapshot,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "stats:")?;
        writeln!(
            f,
            "  {}, uptime: {}, started: {}",
            self.version,
            format_uptime(self.stats.uptime),
            self.stats.started_at.to_rfc3339()
        )?;
        writeln!(
            f,
            "  tasks: {}, workers: {}, mem-rss: {}",
            display_or_unknown(self.alive_tasks),
            display_or_unknown(self.workers),
            display_or_unknown(self.resident_memory_bytes)
        )?;
        writeln!(
            f,
            "  buffers idle: {} allocated: {}",
            self.pool_idle, self.pool_allocated
        )?;
        writeln!(
            f,
            "  bytes upstream: {} downstream: {}",
            self.stats.bytes_upstream, self.stats.bytes_downstream
        )?;
        write!(
            f,
            "  connections open: {} total: {}",
            self.stats.current, self.stats.total
        )
    }
}

fn display_or_unknown<T: fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "unknown".to_string(), |v| v.to_string())
}

/// Render an uptime as `1h2m3.456s`, dropping leading zero units.
fn format_uptime(uptime: Duration) -> String {
    let total_secs = uptime.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = (total_secs % 60) as f64 + f64::from(uptime.subsec_millis()) / 1000.0;

    if hours > 0 {
        format!("{}h{}m{:.3}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{:.3}s", minutes, seconds)
    } else {
        format!("{:.3}s", seconds)
    }
}

#[cfg(target_os = "linux")]
fn resident_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

#[cfg(not(target_os = "linux"))]
fn resident_memory_bytes() -> Option<u64> {
    None
}

/// Extract `VmRSS` (reported in kB) from a `/proc/<pid>/status` body.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_rss(status: &str) -> Option<u64> {
    status.lines().find_map(|line| {
        let rest = line.strip_prefix("VmRSS:")?;
        let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
        Some(kb * 1024)
    })
}
