use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wstxn::server::Dispatcher;
use wstxn::transaction::LOG_TARGET;
use wstxn::{
    AuthManager, ExecuteFailurePolicy, ManagerConfig, MemoryStore, RpcServer, TransactionIdPolicy,
    memory_manager, spawn_sweeper,
};

#[derive(Parser, Debug)]
#[command(name = "wstxn", version, about = "Transactional sessions over stateless RPC")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 8069)]
    port: u16,

    /// Inactivity lifetime of a session before it is swept
    #[arg(long, default_value_t = 3600)]
    ttl_secs: u64,

    #[arg(long, default_value_t = 300)]
    sweep_interval_secs: u64,

    /// Where transaction ids come from: `counter` or `native`
    #[arg(long, default_value = "native")]
    id_policy: TransactionIdPolicy,

    /// Roll the transaction back when an execute call fails
    #[arg(long)]
    rollback_on_error: bool,

    #[arg(long, default_value = "admin")]
    admin_user: String,

    #[arg(long, default_value = "adminpass")]
    admin_password: String,

    /// Store to serve; repeat for several
    #[arg(long = "store", default_values_t = vec!["demo".to_string()])]
    stores: Vec<String>,
}

impl Args {
    fn manager_config(&self) -> ManagerConfig {
        let failure_policy = if self.rollback_on_error {
            ExecuteFailurePolicy::Rollback
        } else {
            ExecuteFailurePolicy::KeepOpen
        };

        ManagerConfig::new()
            .session_ttl(Duration::from_secs(self.ttl_secs))
            .sweep_interval(Duration::from_secs(self.sweep_interval_secs))
            .id_policy(self.id_policy)
            .failure_policy(failure_policy)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.manager_config();
    let sweep_interval = config.sweep_interval;

    let store = Arc::new(MemoryStore::new());
    let auth = Arc::new(AuthManager::with_admin(&args.admin_user, &args.admin_password));
    let stores: Vec<&str> = args.stores.iter().map(String::as_str).collect();

    let manager = Arc::new(
        memory_manager(config, store, auth, &stores)
            .await
            .context("invalid session manager configuration")?,
    );
    let sweeper = spawn_sweeper(Arc::clone(&manager), sweep_interval);

    let dispatcher = Arc::new(Dispatcher::new(manager).context("invalid method table")?);
    let server = RpcServer::new(dispatcher, &args.host, args.port);

    info!(target: LOG_TARGET, stores = ?args.stores, addr = %server.addr(), "Starting wstxn");

    let served = server.run_until(shutdown_signal()).await;
    sweeper.abort();
    served.context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install ctrl+c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install sigterm handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
