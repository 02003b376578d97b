use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use gatehouse_admin::{HostListing, MountListing};
use gatehouse_common::{AppConfig, GatehouseError, GatehouseResult};
use gatehouse_routing::{HostMatch, HostRouter, PathRouter};
use http::{HeaderMap, Method, StatusCode, Uri};
use tracing::{debug, info};

use crate::apps::{build_application, AppRequest, Application};

type MountTable = PathRouter<Arc<dyn Application>>;

/// The request line and headers dispatch needs, borrowed from the request.
pub struct RequestHead<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    pub client: SocketAddr,
    pub tls: bool,
}

/// Host-then-path routing table built from the `hosts` and `applications`
/// sections of the configuration.
pub struct Dispatcher {
    hosts: HostRouter<Arc<MountTable>>,
}

impl Dispatcher {
    pub fn from_config(config: &AppConfig) -> GatehouseResult<Self> {
        let mut apps = HashMap::new();
        for app in &config.applications {
            apps.insert(app.name.as_str(), build_application(app)?);
        }

        let mut hosts = HostRouter::new();
        for host in &config.hosts {
            let mut mounts = PathRouter::new();
            for mount in &host.mounts {
                let app = apps.get(mount.app.as_str()).ok_or_else(|| {
                    GatehouseError::Config(format!(
                        "mount '{}' references unknown application '{}'",
                        mount.path, mount.app
                    ))
                })?;
                mounts
                    .bind(&mount.path, Arc::clone(app))
                    .map_err(|e| GatehouseError::Routing(e.to_string()))?;
            }

            // Every name of one host entry shares one mount table.
            let mounts = Arc::new(mounts);
            for name in &host.names {
                hosts
                    .bind(name, Arc::clone(&mounts))
                    .map_err(|e| GatehouseError::Routing(e.to_string()))?;
            }
        }

        info!(
            hosts = hosts.len(),
            applications = apps.len(),
            "request dispatch table built"
        );
        Ok(Self { hosts })
    }

    /// Route a request to the most specific application willing to answer
    /// it.
    ///
    /// The host binding is chosen first. Its mounts are then tried most
    /// specific first until one application does not decline. No host
    /// binding or no accepting application yields `404 Not Found`.
    pub fn dispatch(&self, head: &RequestHead<'_>) -> Option<Response> {
        let host = request_host(head.uri, head.headers).unwrap_or("");
        let found = self.resolve_host(host)?;

        for mount in found.value.dispatch(head.uri.path()) {
            let request = AppRequest {
                method: head.method,
                uri: head.uri,
                headers: head.headers,
                host,
                host_pattern: found.pattern(),
                mount: mount.pattern(),
                base: mount.base_path(),
                remainder: if mount.remainder.is_empty() {
                    String::new()
                } else {
                    mount.remainder_path()
                },
                client: head.client,
                tls: head.tls,
            };

            match mount.value.handle(&request) {
                Some(response) => return Some(response),
                None => debug!(
                    app = mount.value.name(),
                    mount = %request.mount,
                    "application declined request"
                ),
            }
        }

        None
    }

    /// Canonical text of every host and mount binding.
    pub fn listing(&self) -> Vec<HostListing> {
        self.hosts
            .iter()
            .map(|(pattern, mounts)| HostListing {
                pattern,
                mounts: mounts
                    .iter()
                    .map(|(path, app)| MountListing {
                        path,
                        app: app.name().to_string(),
                    })
                    .collect(),
            })
            .collect()
    }

    fn resolve_host(&self, host: &str) -> Option<HostMatch<'_, Arc<MountTable>>> {
        if let Some(found) = self.hosts.resolve_match(host) {
            return Some(found);
        }
        // Hosts that are not valid DNS names (IP literals, missing header)
        // can still be served by a catch-all binding.
        self.hosts.default_match()
    }
}

/// The answer when no application accepted a request.
pub fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "not found\n").into_response()
}

/// The hostname a request is addressed to, without a port.
///
/// HTTP/2 carries it in the URI authority, HTTP/1.1 in the `Host` header.
pub fn request_host<'a>(uri: &'a Uri, headers: &'a HeaderMap) -> Option<&'a str> {
    if let Some(host) = uri.host() {
        return Some(host);
    }
    let value = headers.get(http::header::HOST)?.to_str().ok()?;
    Some(strip_port(value))
}

fn strip_port(authority: &str) -> &str {
    if let Some(rest) = authority.strip_prefix('[') {
        // Bracketed IPv6 literal.
        return rest.split(']').next().unwrap_or(rest);
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => authority,
    }
}
