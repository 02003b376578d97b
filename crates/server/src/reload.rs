use std::sync::Arc;

use arc_swap::ArcSwap;
use gatehouse_admin::{ConfigReloader, ReloadFuture, Reloaded, RouteListing};
use gatehouse_common::{AppConfig, GatehouseResult};
use tracing::info;

use crate::config::GatehouseConfig;
use crate::dispatch::Dispatcher;
use crate::tls::{listener_certificates, load_certificate_table, CertificateTable};

/// Everything derived from the `hosts`, `applications` and `certificates`
/// sections.
pub struct RoutingTables {
    pub dispatcher: Dispatcher,
    pub certificates: CertificateTable,
}

impl RoutingTables {
    pub fn build(config: &AppConfig) -> GatehouseResult<Self> {
        Ok(Self {
            dispatcher: Dispatcher::from_config(config)?,
            certificates: load_certificate_table(&config.certificates)?,
        })
    }

    pub fn listing(&self) -> RouteListing {
        RouteListing {
            hosts: self.dispatcher.listing(),
            certificates: self
                .certificates
                .iter()
                .map(|(pattern, _)| pattern)
                .collect(),
        }
    }
}

/// Certificate table of one TLS listener, scoped to its `server_names`.
pub struct ListenerCertificates {
    pub server_names: Option<Vec<String>>,
    pub table: Arc<ArcSwap<CertificateTable>>,
}

impl ListenerCertificates {
    fn scope(&self, tables: &RoutingTables) -> GatehouseResult<CertificateTable> {
        listener_certificates(&tables.certificates, self.server_names.as_deref())
    }
}

/// The tables the running server reads, each swappable as a whole.
pub struct LiveTables {
    pub dispatcher: Arc<ArcSwap<Dispatcher>>,
    pub listeners: Vec<ListenerCertificates>,
}

impl LiveTables {
    /// Scope `tables` for every TLS listener of `config`.
    pub fn new(config: &AppConfig, tables: RoutingTables) -> GatehouseResult<Self> {
        let mut listeners = Vec::new();
        for listen in config.server.listen.iter().filter(|l| l.tls) {
            let server_names = listen.server_names.clone();
            let table = listener_certificates(&tables.certificates, server_names.as_deref())?;
            listeners.push(ListenerCertificates {
                server_names,
                table: Arc::new(ArcSwap::from_pointee(table)),
            });
        }

        Ok(Self {
            dispatcher: Arc::new(ArcSwap::from_pointee(tables.dispatcher)),
            listeners,
        })
    }

    /// Swap in freshly built tables. Every listener scope is computed before
    /// anything is stored, so a failure leaves the running tables intact.
    pub fn replace(&self, tables: RoutingTables) -> GatehouseResult<()> {
        let scoped = self
            .listeners
            .iter()
            .map(|listener| listener.scope(&tables))
            .collect::<GatehouseResult<Vec<_>>>()?;

        for (listener, table) in self.listeners.iter().zip(scoped) {
            listener.table.store(Arc::new(table));
        }
        self.dispatcher.store(Arc::new(tables.dispatcher));
        Ok(())
    }
}

/// Rebuilds the routing tables from the configuration file on demand.
pub struct ServerReloader {
    source: Arc<GatehouseConfig>,
    live: Arc<LiveTables>,
}

impl ServerReloader {
    pub fn new(source: GatehouseConfig, live: Arc<LiveTables>) -> Self {
        Self {
            source: Arc::new(source),
            live,
        }
    }
}

impl ConfigReloader for ServerReloader {
    fn reload(&self) -> ReloadFuture<'_> {
        let source = Arc::clone(&self.source);
        let live = Arc::clone(&self.live);
        // Config and certificate files are read with blocking I/O.
        Box::pin(async move {
            tokio::task::spawn_blocking(move || reload_tables(&source, &live)).await?
        })
    }
}

fn reload_tables(source: &GatehouseConfig, live: &LiveTables) -> anyhow::Result<Reloaded> {
    let config = source.reload()?;
    let tables = RoutingTables::build(&config)?;
    let routes = tables.listing();
    live.replace(tables)?;

    info!(
        hosts = routes.hosts.len(),
        certificates = routes.certificates.len(),
        "routing tables replaced"
    );
    Ok(Reloaded { config, routes })
}
