//! Operator console: a status-line renderer plus a single-command-byte
//! reader, standing in for the curses-style TUI (out of scope per the
//! purpose statement). Grounded on the node's `status_task` periodic
//! `tracing::info!` summary, generalized to also accept operator input.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use crate::controller::Controller;

/// One key read from stdin, per §6's command-key table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Quit,
    PoolMenu,
    Display,
    Settings,
    GpuManagement,
}

impl ConsoleCommand {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'q' => Some(ConsoleCommand::Quit),
            b'p' => Some(ConsoleCommand::PoolMenu),
            b'd' => Some(ConsoleCommand::Display),
            b's' => Some(ConsoleCommand::Settings),
            b'g' => Some(ConsoleCommand::GpuManagement),
            _ => None,
        }
    }
}

/// Renders a status line and reads operator commands. The default
/// implementation below writes to stdout/reads stdin; a curses-style
/// redraw is the "terminal UI" collaborator's job, not this trait's.
pub trait OperatorConsole: Send + Sync {
    fn render_status(&self, line: &str);
}

/// Plain stdout status-line writer, logged at `info` so it shows up
/// alongside the rest of the daemon's structured events.
#[derive(Default)]
pub struct StdoutConsole;

impl OperatorConsole for StdoutConsole {
    fn render_status(&self, line: &str) {
        info!("{line}");
    }
}

/// Formats the global hashrate, per-pool accept/reject, and per-hasher
/// state into one line, per §4.10.
pub async fn status_line(controller: &Controller) -> String {
    let hashers = controller.hasher_snapshot().await;
    let total_mhps: f64 = hashers.iter().map(|h| h.rolling_mhps).sum();
    let well = hashers.iter().filter(|h| h.state == crate::core::types::HasherState::Well).count();
    let totals = controller.totals.lock().await.clone();
    let pools = controller.pools.all().await;
    let accepted: u64 = pools.iter().map(|p| p.counters.accepted).sum();
    let rejected: u64 = pools.iter().map(|p| p.counters.rejected).sum();
    let efficiency = if accepted + rejected > 0 { 100.0 * accepted as f64 / (accepted + rejected) as f64 } else { 100.0 };

    format!(
        "{:.2} Mh/s | hashers {}/{} well | accepted={} rejected={} stale={} hw_errors={} eff={:.1}%",
        total_mhps,
        well,
        hashers.len(),
        accepted,
        rejected,
        totals.stale_shares,
        totals.hw_errors,
        efficiency,
    )
}

/// Background stdin reader: recognizes the keys in §6 and forwards the
/// parsed `ConsoleCommand`s to `tx`. Runs until stdin closes or the
/// controller starts shutting down.
pub async fn read_commands(controller: Arc<Controller>, tx: mpsc::Sender<ConsoleCommand>) {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    loop {
        if controller.is_shutting_down() {
            break;
        }
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(b) = line.trim().bytes().next() {
                    if let Some(cmd) = ConsoleCommand::from_byte(b) {
                        if tx.send(cmd).await.is_err() {
                            break;
                        }
                    }
                }
            }
            _ => break,
        }
    }
}

/// Applies one console command to the controller/pool registry. Returns
/// `true` if the command should end the run (quit).
pub async fn apply_command(controller: &Controller, cmd: ConsoleCommand) -> bool {
    match cmd {
        ConsoleCommand::Quit => {
            controller.kill_work().await;
            true
        }
        // Pool menu, display options, settings, and GPU management are
        // interactive sub-menus in the original console; driving them is
        // the terminal UI collaborator's concern. The Controller exposes
        // everything they'd need (`pools`, `settings`, `hashers`) already.
        ConsoleCommand::PoolMenu | ConsoleCommand::Display | ConsoleCommand::Settings | ConsoleCommand::GpuManagement => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::pool::{PoolRegistry, Strategy};

    fn settings() -> Settings {
        Settings {
            pools: vec![],
            retries: -1,
            scantime: std::time::Duration::from_secs(60),
            queue_depth: 2,
            pool_strategy: Strategy::Failover,
            rotate_period: std::time::Duration::from_secs(60),
            submit_stale: false,
            failover_only: false,
            dynamic: false,
            log_interval: std::time::Duration::from_secs(5),
            sched_start: None,
            sched_stop: None,
            cpu_threads: 1,
            gpu_threads: 0,
            shares_goal: None,
        }
    }

    #[test]
    fn command_bytes_map_to_known_keys() {
        assert_eq!(ConsoleCommand::from_byte(b'q'), Some(ConsoleCommand::Quit));
        assert_eq!(ConsoleCommand::from_byte(b'p'), Some(ConsoleCommand::PoolMenu));
        assert_eq!(ConsoleCommand::from_byte(b'x'), None);
    }

    #[tokio::test]
    async fn status_line_reports_hasher_and_pool_counts() {
        let controller = Controller::new(settings(), PoolRegistry::new(Strategy::Failover));
        controller.spawn_hashers(1, 0).await;
        let line = status_line(&controller).await;
        assert!(line.contains("0/1 well"));
    }

    #[tokio::test]
    async fn quit_command_kills_work() {
        let controller = Controller::new(settings(), PoolRegistry::new(Strategy::Failover));
        assert!(apply_command(&controller, ConsoleCommand::Quit).await);
        assert!(controller.is_shutting_down());
    }
}
