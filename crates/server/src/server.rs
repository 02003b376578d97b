use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use gatehouse_admin::{AppState, ConfigReloader, SharedState};
use gatehouse_rate_limit::RateLimiter;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::GatehouseConfig;
use crate::listener::{AdmittedListener, ClientAddr};
use crate::reload::{LiveTables, RoutingTables, ServerReloader};
use crate::service::{self, Endpoint, ServiceState};
use crate::tls;

/// A started server: its listeners, the admin API and their shutdown switch.
pub struct RunningServer {
    pub local_addrs: Vec<SocketAddr>,
    pub state: SharedState,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningServer {
    /// Build the routing tables and rate limiter, bind every listener and
    /// start serving.
    pub async fn start(source: GatehouseConfig) -> Result<Self> {
        let config = source.config.clone();

        let limiter = RateLimiter::new(&config.rate_limit).context("invalid rate_limit section")?;
        let tables = RoutingTables::build(&config)?;
        let routes = tables.listing();
        let live = Arc::new(LiveTables::new(&config, tables)?);

        let reloader: Arc<dyn ConfigReloader> =
            Arc::new(ServerReloader::new(source, Arc::clone(&live)));
        let state: SharedState = Arc::new(AppState::new(
            config.clone(),
            routes,
            limiter,
            Some(reloader),
        )?);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let service_state = ServiceState {
            dispatcher: Arc::clone(&live.dispatcher),
            shared: Arc::clone(&state),
        };

        let mut tls_tables = live.listeners.iter();
        let mut local_addrs = Vec::new();
        let mut tasks = Vec::new();

        for listen in &config.server.listen {
            let acceptor = if listen.tls {
                let certificates = tls_tables
                    .next()
                    .context("TLS listener without a certificate table")?;
                Some(tls::acceptor(Arc::clone(&certificates.table)))
            } else {
                None
            };

            let listener = AdmittedListener::bind(
                &listen.addr,
                acceptor,
                Arc::clone(&state),
                shutdown_rx.clone(),
            )
            .await
            .with_context(|| format!("failed to bind {}", listen.addr))?;
            let local_addr = axum::serve::Listener::local_addr(&listener)?;
            local_addrs.push(local_addr);

            let app = service::router(service_state.clone(), Endpoint { tls: listen.tls })
                .into_make_service_with_connect_info::<ClientAddr>();
            let mut stop = shutdown_rx.clone();

            tasks.push(tokio::spawn(async move {
                let result = axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = stop.wait_for(|stop| *stop).await;
                    })
                    .await;
                if let Err(e) = result {
                    error!(addr = %local_addr, error = %e, "server error");
                }
            }));
        }

        if config.server.admin.enabled {
            let admin_state = Arc::clone(&state);
            let admin_listen = config.server.admin.listen.clone();
            let mut stop = shutdown_rx.clone();

            tasks.push(tokio::spawn(async move {
                info!(addr = %admin_listen, "starting admin API");
                let result = gatehouse_admin::run_admin_server(admin_state, &admin_listen, async move {
                    let _ = stop.wait_for(|stop| *stop).await;
                })
                .await;
                if let Err(e) = result {
                    error!(error = %e, "admin API server error");
                }
            }));
        }

        info!(listeners = local_addrs.len(), "Gatehouse started");

        Ok(Self {
            local_addrs,
            state,
            shutdown,
            tasks,
        })
    }

    /// Stop accepting, deny every queued rate limit waiter and wait for the
    /// servers to drain.
    pub async fn shutdown(self) {
        info!("shutting down");
        let _ = self.shutdown.send(true);
        self.state.limiter.shutdown();

        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "server task failed");
            }
        }
        info!("shutdown complete");
    }
}
