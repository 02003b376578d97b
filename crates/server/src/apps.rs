use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gatehouse_common::{ApplicationConfig, ApplicationKind, GatehouseError, GatehouseResult};
use http::header::{CONTENT_TYPE, LOCATION, USER_AGENT};
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use serde::Serialize;

/// Everything an application sees about a request once routing has picked
/// a host binding and a mount for it.
pub struct AppRequest<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    /// Hostname as presented by the client, port stripped.
    pub host: &'a str,
    /// Host pattern that matched, e.g. `*.example.com`.
    pub host_pattern: String,
    /// Mount pattern that matched, e.g. `/files/*`.
    pub mount: String,
    /// Path consumed by the mount.
    pub base: String,
    /// Path left over below the mount; empty when nothing is left.
    pub remainder: String,
    pub client: SocketAddr,
    pub tls: bool,
}

/// A request handler mounted under a path pattern.
///
/// Returning `None` declines the request, and dispatch moves on to the next
/// less specific mount.
pub trait Application: Send + Sync {
    fn name(&self) -> &str;

    fn handle(&self, request: &AppRequest<'_>) -> Option<Response>;
}

/// Build an application from its configuration entry.
pub fn build_application(config: &ApplicationConfig) -> GatehouseResult<Arc<dyn Application>> {
    let name = config.name.clone();
    let app: Arc<dyn Application> = match &config.kind {
        ApplicationKind::Text {
            body,
            status,
            content_type,
            exact_only,
        } => Arc::new(TextApp {
            name,
            body: body.clone(),
            status: status_code(&config.name, *status)?,
            content_type: HeaderValue::from_str(content_type).map_err(|_| {
                GatehouseError::Config(format!(
                    "application '{}': invalid content type '{}'",
                    config.name, content_type
                ))
            })?,
            exact_only: *exact_only,
        }),
        ApplicationKind::Redirect { target, status } => {
            let status = status_code(&config.name, *status)?;
            if !status.is_redirection() {
                return Err(GatehouseError::Config(format!(
                    "application '{}': {} is not a redirect status",
                    config.name, status
                )));
            }
            Arc::new(RedirectApp {
                name,
                target: target.trim_end_matches('/').to_string(),
                status,
            })
        }
        ApplicationKind::Echo => Arc::new(EchoApp { name }),
    };
    Ok(app)
}

fn status_code(app: &str, status: u16) -> GatehouseResult<StatusCode> {
    StatusCode::from_u16(status)
        .map_err(|_| GatehouseError::Config(format!("application '{}': invalid status {}", app, status)))
}

/// Fixed body for every request it accepts.
pub struct TextApp {
    name: String,
    body: String,
    status: StatusCode,
    content_type: HeaderValue,
    exact_only: bool,
}

impl Application for TextApp {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, request: &AppRequest<'_>) -> Option<Response> {
        if self.exact_only && !request.remainder.is_empty() {
            return None;
        }
        Some(
            (
                self.status,
                [(CONTENT_TYPE, self.content_type.clone())],
                self.body.clone(),
            )
                .into_response(),
        )
    }
}

/// Prefix redirect: the unconsumed remainder and the query string are
/// carried over to the target.
pub struct RedirectApp {
    name: String,
    target: String,
    status: StatusCode,
}

impl RedirectApp {
    fn location(&self, request: &AppRequest<'_>) -> String {
        let mut location = if request.remainder.is_empty() {
            format!("{}/", self.target)
        } else {
            format!("{}{}", self.target, request.remainder)
        };
        if let Some(query) = request.uri.query() {
            location.push('?');
            location.push_str(query);
        }
        location
    }
}

impl Application for RedirectApp {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, request: &AppRequest<'_>) -> Option<Response> {
        let location = HeaderValue::from_str(&self.location(request)).ok()?;
        let mut response = Response::new(Body::empty());
        *response.status_mut() = self.status;
        response.headers_mut().insert(LOCATION, location);
        Some(response)
    }
}

/// Describes how the request was routed.
pub struct EchoApp {
    name: String,
}

#[derive(Serialize)]
struct EchoBody<'a> {
    app: &'a str,
    method: &'a str,
    host: &'a str,
    host_pattern: &'a str,
    mount: &'a str,
    base: &'a str,
    remainder: &'a str,
    path: &'a str,
    query: Option<&'a str>,
    user_agent: Option<&'a str>,
    client: String,
    tls: bool,
}

impl Application for EchoApp {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, request: &AppRequest<'_>) -> Option<Response> {
        let body = EchoBody {
            app: &self.name,
            method: request.method.as_str(),
            host: request.host,
            host_pattern: &request.host_pattern,
            mount: &request.mount,
            base: &request.base,
            remainder: &request.remainder,
            path: request.uri.path(),
            query: request.uri.query(),
            user_agent: request
                .headers
                .get(USER_AGENT)
                .and_then(|value| value.to_str().ok()),
            client: request.client.to_string(),
            tls: request.tls,
        };
        Some(Json(body).into_response())
    }
}
