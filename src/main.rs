use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;

use cgcoord::config::{Cli, CoordinatorConfig, Settings};
use cgcoord::console;
use cgcoord::controller::Controller;
use cgcoord::hasher::{self, CpuHashBackend};
use cgcoord::pool::{PoolConfig, PoolRegistry};
use cgcoord::rpc::{HttpTransport, PoolEndpoint, PoolTransport};
use cgcoord::schedule::ScheduleWindow;
use cgcoord::{arbiter, fetcher, longpoll, submit, watchdog};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("cgcoord=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let code = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt.block_on(run(cli)),
        Err(e) => {
            tracing::error!(error = %e, "failed to start async runtime");
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let file = match &cli.config {
        Some(path) => match CoordinatorConfig::load_file(path) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                tracing::error!(error = %e, path = %path, "failed to load config file");
                return 1;
            }
        },
        None => None,
    };

    let settings = match Settings::resolve(&cli, file) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to resolve settings");
            return 1;
        }
    };

    if settings.pools.is_empty() {
        tracing::error!("no pools configured; pass --url at least once");
        return 1;
    }

    let schedule = match ScheduleWindow::parse(settings.sched_start.as_deref(), settings.sched_stop.as_deref()) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!(error = %e, "invalid schedule window");
            return 1;
        }
    };

    let registry = PoolRegistry::new(settings.pool_strategy);
    registry.set_failover_only(settings.failover_only);
    for (url, user, pass) in &settings.pools {
        registry.add(PoolConfig { url: url.clone(), user: user.clone(), pass: pass.clone() }).await;
    }

    let transport = match HttpTransport::new(std::time::Duration::from_secs(30)) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            tracing::error!(error = %e, "failed to build HTTP transport");
            return 1;
        }
    };

    let cpu_threads = if settings.cpu_threads == 0 && settings.gpu_threads == 0 { num_cpus::get().max(1) } else { settings.cpu_threads };
    let gpu_threads = settings.gpu_threads;
    let shares_goal = settings.shares_goal;

    let controller = Controller::new(settings, registry);
    controller.spawn_hashers(cpu_threads, gpu_threads).await;

    tracing::info!(
        pools = controller.pools.all().await.len(),
        cpu_threads,
        gpu_threads,
        strategy = ?controller.pools.strategy().await,
        "coordinator starting"
    );

    let (get_work_tx, get_work_rx) = mpsc::channel(32);
    let (arbiter_tx, arbiter_rx) = mpsc::channel(32);
    let (submit_tx, submit_rx) = mpsc::channel(32);

    let fetcher_handle = tokio::spawn(fetcher::run(controller.clone(), transport.clone(), get_work_rx, arbiter_tx.clone()));
    let arbiter_handle = tokio::spawn(arbiter::run(controller.clone(), arbiter_rx));
    let submit_handle = tokio::spawn(submit::run(controller.clone(), transport.clone(), submit_rx));
    let watchdog_handle = tokio::spawn(watchdog::run(controller.clone(), schedule));

    let longpoll_handle = maybe_start_long_poll(&controller, &transport, &arbiter_tx).await;

    // hash_div reflects how many ways a unit's nonce space should be split;
    // one share per hasher thread keeps clones non-overlapping across the pool.
    let hash_div = (cpu_threads + gpu_threads).max(1) as u64;
    hasher::spawn_pool(controller.clone(), Arc::new(CpuHashBackend), cpu_threads, gpu_threads, hash_div, get_work_tx.clone(), submit_tx.clone());

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        let ctrlc_result = ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        });
        if let Err(e) = ctrlc_result {
            tracing::warn!(error = %e, "failed to install Ctrl-C handler");
        }
    }

    let (console_tx, mut console_rx) = mpsc::channel(8);
    tokio::spawn(console::read_commands(controller.clone(), console_tx));

    let mut status_ticker = tokio::time::interval(controller.settings.log_interval);
    loop {
        tokio::select! {
            _ = status_ticker.tick() => {
                let line = console::status_line(&controller).await;
                tracing::info!("{line}");
            }
            Some(cmd) = console_rx.recv() => {
                if console::apply_command(&controller, cmd).await {
                    break;
                }
            }
            else => {}
        }

        if shutdown.load(Ordering::SeqCst) || controller.is_shutting_down() {
            controller.kill_work().await;
            break;
        }
        if controller.share_goal_reached() {
            break;
        }
    }

    watchdog_handle.abort();
    if let Some(h) = longpoll_handle {
        h.abort();
    }
    fetcher_handle.abort();
    arbiter_handle.abort();
    submit_handle.abort();

    let goal_met = shares_goal.map(|_| controller.share_goal_reached()).unwrap_or(true);
    if goal_met {
        0
    } else {
        1
    }
}

/// Performs one up-front `getwork` against the primary pool to learn its
/// advertised long-poll path, then starts a Long-Poll Listener against it
/// if one was advertised. Per §4.7, the listener is cancelled and restarted
/// against whichever pool becomes primary on an explicit switch; this
/// startup wiring covers the common single/primary-pool case.
async fn maybe_start_long_poll<T: PoolTransport + 'static>(
    controller: &Arc<Controller>,
    transport: &Arc<T>,
    arbiter_tx: &mpsc::Sender<arbiter::FetchedUnit>,
) -> Option<tokio::task::JoinHandle<()>> {
    let pool = controller.pools.current().await?;
    let endpoint = PoolEndpoint { pool_no: pool.pool_no, url: pool.url.clone(), user: pool.user.clone(), pass: pool.pass.clone() };
    let probe = transport.get_work(&endpoint).await.ok()?;
    let path = probe.hdr_path?;

    Some(tokio::spawn(longpoll::run(controller.clone(), transport.clone(), endpoint, path, arbiter_tx.clone())))
}
