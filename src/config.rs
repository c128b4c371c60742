//! CLI flags (clap derive) plus an optional TOML config file. CLI values
//! always win over the file — mirrors the node's flat `Cli` struct with
//! global flags, generalized to a merge-with-file step the node itself
//! doesn't need.

use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::pool::Strategy;

#[derive(Parser, Debug)]
#[command(name = "cgcoord", version = "1.0.0")]
#[command(about = "Multi-pool, multi-device proof-of-work mining coordinator")]
pub struct Cli {
    /// Optional TOML config file; CLI flags override its values.
    #[arg(long)]
    pub config: Option<String>,

    /// Pool URL. Repeat for multiple pools, in priority order.
    #[arg(long = "url")]
    pub urls: Vec<String>,
    /// Username, paired positionally with --url.
    #[arg(long = "user")]
    pub users: Vec<String>,
    /// Password, paired positionally with --url.
    #[arg(long = "pass")]
    pub passes: Vec<String>,
    /// Combined "user:pass" form, paired positionally with --url.
    #[arg(long = "userpass")]
    pub userpasses: Vec<String>,

    #[arg(long)]
    pub retries: Option<i32>,
    #[arg(long)]
    pub scantime: Option<u64>,
    #[arg(long)]
    pub queue: Option<usize>,
    #[arg(long = "pool-strategy")]
    pub pool_strategy: Option<String>,
    #[arg(long = "rotate-period")]
    pub rotate_period: Option<u64>,
    #[arg(long = "submit-stale")]
    pub submit_stale: bool,
    #[arg(long = "failover-only")]
    pub failover_only: bool,
    #[arg(long)]
    pub dynamic: bool,
    #[arg(long = "log-interval")]
    pub log_interval: Option<u64>,
    #[arg(long = "sched-start")]
    pub sched_start: Option<String>,
    #[arg(long = "sched-stop")]
    pub sched_stop: Option<String>,
    #[arg(long = "cpu-threads")]
    pub cpu_threads: Option<usize>,
    #[arg(long = "gpu-threads")]
    pub gpu_threads: Option<usize>,
    #[arg(long)]
    pub shares: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PoolFileConfig {
    pub url: String,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub userpass: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub pools: Vec<PoolFileConfig>,
    pub retries: Option<i32>,
    pub scantime: Option<u64>,
    pub queue: Option<usize>,
    pub pool_strategy: Option<String>,
    pub rotate_period: Option<u64>,
    pub submit_stale: Option<bool>,
    pub failover_only: Option<bool>,
    pub dynamic: Option<bool>,
    pub log_interval: Option<u64>,
    pub sched_start: Option<String>,
    pub sched_stop: Option<String>,
    pub cpu_threads: Option<usize>,
    pub gpu_threads: Option<usize>,
    pub shares: Option<u64>,
}

impl CoordinatorConfig {
    pub fn load_file(path: &str) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

/// Resolved, fully-defaulted settings the Controller is built from.
#[derive(Debug, Clone)]
pub struct Settings {
    pub pools: Vec<(String, String, String)>,
    pub retries: i32,
    pub scantime: Duration,
    pub queue_depth: usize,
    pub pool_strategy: Strategy,
    pub rotate_period: Duration,
    pub submit_stale: bool,
    pub failover_only: bool,
    pub dynamic: bool,
    pub log_interval: Duration,
    pub sched_start: Option<String>,
    pub sched_stop: Option<String>,
    pub cpu_threads: usize,
    pub gpu_threads: usize,
    pub shares_goal: Option<u64>,
}

impl Settings {
    /// Merges CLI flags over an optional file config; CLI values take
    /// precedence field-by-field.
    pub fn resolve(cli: &Cli, file: Option<CoordinatorConfig>) -> anyhow::Result<Self> {
        let file = file.unwrap_or_default();

        let mut pools = Vec::new();
        for (i, url) in cli.urls.iter().enumerate() {
            let (user, pass) = if let Some(up) = cli.userpasses.get(i) {
                split_userpass(up)
            } else {
                (cli.users.get(i).cloned().unwrap_or_default(), cli.passes.get(i).cloned().unwrap_or_default())
            };
            pools.push((url.clone(), user, pass));
        }
        if pools.is_empty() {
            for p in &file.pools {
                let (user, pass) = match (&p.userpass, &p.user, &p.pass) {
                    (Some(up), _, _) => split_userpass(up),
                    (None, user, pass) => (user.clone().unwrap_or_default(), pass.clone().unwrap_or_default()),
                };
                pools.push((p.url.clone(), user, pass));
            }
        }

        let strategy_str = cli.pool_strategy.clone().or(file.pool_strategy).unwrap_or_else(|| "failover".to_string());
        let pool_strategy: Strategy = strategy_str.parse().map_err(|e: String| anyhow::anyhow!(e))?;

        Ok(Settings {
            pools,
            retries: cli.retries.or(file.retries).unwrap_or(-1),
            scantime: Duration::from_secs(cli.scantime.or(file.scantime).unwrap_or(crate::core::params::DEFAULT_SCANTIME_SECS)),
            queue_depth: cli.queue.or(file.queue).unwrap_or(crate::core::params::DEFAULT_QUEUE_DEPTH),
            pool_strategy,
            rotate_period: Duration::from_secs(cli.rotate_period.or(file.rotate_period).unwrap_or(60) * 60),
            submit_stale: cli.submit_stale || file.submit_stale.unwrap_or(false),
            failover_only: cli.failover_only || file.failover_only.unwrap_or(false),
            dynamic: cli.dynamic || file.dynamic.unwrap_or(false),
            log_interval: Duration::from_secs(cli.log_interval.or(file.log_interval).unwrap_or(5)),
            sched_start: cli.sched_start.clone().or(file.sched_start),
            sched_stop: cli.sched_stop.clone().or(file.sched_stop),
            cpu_threads: cli.cpu_threads.or(file.cpu_threads).unwrap_or(0),
            gpu_threads: cli.gpu_threads.or(file.gpu_threads).unwrap_or(0),
            shares_goal: cli.shares.or(file.shares),
        })
    }
}

fn split_userpass(up: &str) -> (String, String) {
    match up.split_once(':') {
        Some((u, p)) => (u.to_string(), p.to_string()),
        None => (up.to_string(), String::new()),
    }
}
