//! wspool binary.
//!
//! Opens pooled WebSocket sessions to one endpoint and reports their
//! lifecycle (connect, loss, reconnect, retirement, replacement) until the
//! watch period ends or the process is interrupted.

use clap::Parser;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wspool_pool::{PoolEventHandler, PoolKey, PoolManager};
use wspool_session::{SessionId, SessionState};

mod config;
mod logging;

use config::WsPoolConfig;
use logging::PoolLogFormatter;

/// How often pool statistics are logged while watching
const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Pooled WebSocket sessions with bounded reconnect
#[derive(Parser, Debug)]
#[command(name = "wspool", version, about = "Pooled WebSocket RPC sessions")]
struct Args {
    /// Endpoint to connect to, e.g. ws://127.0.0.1:8546
    #[arg(long)]
    endpoint: Option<String>,

    /// Pool namespace (default: global)
    #[arg(long)]
    namespace: Option<String>,

    /// Pool capacity
    #[arg(long)]
    pool_size: Option<usize>,

    /// Number of sessions to acquire at startup
    #[arg(long)]
    sessions: Option<usize>,

    /// Failed reconnects tolerated before a session is retired
    #[arg(long)]
    reconnect_budget: Option<u32>,

    /// Leave the connection unclosed when the reconnect budget runs out
    #[arg(long)]
    keep_on_exhaustion: bool,

    /// First reconnect delay, e.g. 1s
    #[arg(long)]
    reconnect_delay: Option<humantime::Duration>,

    /// Ping interval, e.g. 10s
    #[arg(long)]
    ping_interval: Option<humantime::Duration>,

    /// Idle timeout, e.g. 30s
    #[arg(long)]
    idle_timeout: Option<humantime::Duration>,

    /// Stop after this long; runs until interrupted when unset
    #[arg(long)]
    watch: Option<humantime::Duration>,

    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Command-line flags take precedence over file and environment
    fn apply_to(&self, config: &mut WsPoolConfig) {
        if let Some(ref endpoint) = self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(ref namespace) = self.namespace {
            config.namespace = Some(namespace.clone());
        }
        if let Some(pool_size) = self.pool_size {
            config.pool_size = pool_size;
        }
        if let Some(sessions) = self.sessions {
            config.sessions = sessions;
        }
        if let Some(budget) = self.reconnect_budget {
            config.reconnect_budget = budget;
        }
        if self.keep_on_exhaustion {
            config.kill_on_exhaustion = false;
        }
        if let Some(delay) = self.reconnect_delay {
            config.reconnect_delay = delay.into();
            if config.max_reconnect_delay < config.reconnect_delay {
                config.max_reconnect_delay = config.reconnect_delay;
            }
        }
        if let Some(interval) = self.ping_interval {
            config.ping_interval = Some(interval.into());
        }
        if let Some(timeout) = self.idle_timeout {
            config.idle_timeout = Some(timeout.into());
        }
    }
}

/// Reports pool events through the component loggers
#[derive(Debug)]
struct LoggingEventHandler;

impl PoolEventHandler for LoggingEventHandler {
    fn notify_pool_created(&self, key: &PoolKey) {
        component_info!("pool", "Pool {} ready", key);
    }

    fn notify_session_added(&self, key: &PoolKey, id: SessionId) {
        component_debug!("pool", "Pool {} opened session {}", key, id);
    }

    fn notify_session_state(&self, key: &PoolKey, id: SessionId, from: SessionState, to: SessionState) {
        match to {
            SessionState::Active => {
                component_info!("session", "Session {} in {} is active (was {})", id, key, from)
            }
            SessionState::Reconnecting => {
                component_warn!("session", "Session {} in {} lost its connection", id, key)
            }
            SessionState::Dead => {
                component_warn!("session", "Session {} in {} is dead", id, key)
            }
            SessionState::Connecting => {}
        }
    }

    fn notify_session_evicted(&self, key: &PoolKey, id: SessionId) {
        component_info!("pool", "Session {} evicted from {}; next acquire replaces it", id, key);
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("wspool={}", args.log_level).parse()?)
        .add_directive(format!("wspool_session={}", args.log_level).parse()?)
        .add_directive(format!("wspool_pool={}", args.log_level).parse()?);

    let formatter = PoolLogFormatter::new("wspool".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(true)
        .event_format(formatter)
        .init();

    info!("Starting wspool v{}", env!("CARGO_PKG_VERSION"));

    let mut config = WsPoolConfig::load_from_file(&args.config)?;
    args.apply_to(&mut config);

    let options = config.pool_options();
    options.validate()?;

    info!(
        "Pool config: capacity={}, reconnect_budget={}, kill_on_exhaustion={}, ping_interval={:?}, idle_timeout={:?}",
        options.capacity,
        options.session.reconnect_budget,
        options.session.kill_on_exhaustion,
        options.session.ping_interval,
        options.session.idle_timeout
    );

    let mut manager = PoolManager::websocket();
    manager.set_event_handler(Arc::new(LoggingEventHandler));

    let namespace = config.namespace.as_deref();
    let mut sessions = Vec::with_capacity(config.sessions);
    for _ in 0..config.sessions {
        let session = manager.acquire(&config.endpoint, namespace, &options).await?;
        component_info!(
            "session",
            "Acquired session {} to {} ({})",
            session.id(),
            session.endpoint(),
            session.state()
        );
        sessions.push(session);
    }

    let mut stats_ticker = interval(STATS_INTERVAL);
    stats_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    stats_ticker.tick().await;

    let deadline = async {
        match args.watch {
            Some(period) => sleep(period.into()).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("Watch period elapsed");
                break;
            }
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Interrupted"),
                    Err(e) => component_error!("signal", "Failed to listen for ctrl-c: {}", e),
                }
                break;
            }
            _ = stats_ticker.tick() => {
                for pool in manager.pools() {
                    let stats = pool.stats().await;
                    info!(
                        "Pool {}: tracked={}/{}, created={}, evicted={}, acquired={}",
                        pool.key(),
                        stats.tracked,
                        pool.capacity(),
                        stats.created,
                        stats.evicted,
                        stats.acquired
                    );
                }
                let dead = sessions.iter().filter(|s| s.is_dead()).count();
                if dead > 0 {
                    warn!("{} of the startup sessions are dead", dead);
                }
            }
        }
    }

    manager.shutdown().await;
    info!("wspool stopped");
    Ok(())
}
