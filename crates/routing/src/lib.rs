//! Hierarchical, wildcard-aware name routing.
//!
//! A [`RouteTree`] maps [`RouteKey`]s (ordered name segments plus a wildcard
//! flag) to values and answers "most specific binding first" queries. Two
//! thin adapters build keys for the two name spaces the server routes on:
//!
//! - [`HostRouter`] -- DNS names, stored TLD-first so `*.example.com` is a
//!   wildcard under `com` -> `example`. Used for certificate selection during
//!   TLS SNI and for virtual hosts.
//! - [`PathRouter`] -- URL paths, stored root-first, with exact, directory
//!   (`/dir/`) and wildcard (`/dir/*`) mounts.
//!
//! Tables are built once at startup (or off to the side during a reload) and
//! are read-only afterwards, so lookups need no locking.

pub mod error;
pub mod host;
pub mod key;
pub mod path;
pub mod tree;

pub use error::{RouteError, RouteResult};
pub use host::{hostname_candidate, parse_hostname_pattern, HostMatch, HostRouter};
pub use key::{KeyFormat, RouteKey};
pub use path::{parse_path_pattern, request_path_candidate, Dispatch, PathMatch, PathRouter};
pub use tree::{MostSpecific, RouteMatch, RouteTree};
