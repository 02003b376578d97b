use std::collections::BTreeMap;
use std::fmt;

use crate::error::{RouteError, RouteResult};
use crate::key::{KeyFormat, RouteKey};
use crate::tree::{RouteMatch, RouteTree};

const MAX_LABEL_LEN: usize = 63;

/// Parse a hostname pattern into a TLD-first key.
///
/// Accepted forms:
/// - `*` -- matches every hostname
/// - `*.example.com` -- matches any subdomain of `example.com`
/// - `www.example.com` -- matches only itself
///
/// Labels are `[-A-Za-z0-9]+` without a leading or trailing hyphen and are
/// lowercased. Wildcard forms are rejected unless `allow_wildcard` is set.
pub fn parse_hostname_pattern(pattern: &str, allow_wildcard: bool) -> RouteResult<RouteKey> {
    let invalid = |reason: &str| RouteError::InvalidHostname {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    let (wildcard, rest) = if pattern == "*" {
        (true, "")
    } else if let Some(rest) = pattern.strip_prefix("*.") {
        (true, rest)
    } else {
        (false, pattern)
    };

    if wildcard && !allow_wildcard {
        return Err(invalid("wildcards are not allowed here"));
    }
    if !wildcard && rest.is_empty() {
        return Err(invalid("empty hostname"));
    }

    let mut labels = Vec::new();
    if !rest.is_empty() {
        for label in rest.split('.') {
            if let Err(reason) = check_label(label) {
                return Err(invalid(reason));
            }
            labels.push(label.to_ascii_lowercase());
        }
    }
    labels.reverse();

    Ok(RouteKey::new(labels, wildcard))
}

/// Turn a client-presented hostname into a lookup key. Case is folded and a
/// single trailing dot is ignored. Returns `None` for names that could never
/// match a binding.
pub fn hostname_candidate(hostname: &str) -> Option<RouteKey> {
    let hostname = hostname.strip_suffix('.').unwrap_or(hostname);
    if hostname.is_empty() {
        return None;
    }

    let mut labels = Vec::new();
    for label in hostname.split('.') {
        check_label(label).ok()?;
        labels.push(label.to_ascii_lowercase());
    }
    labels.reverse();

    Some(RouteKey::new(labels, false))
}

fn check_label(label: &str) -> Result<(), &'static str> {
    if label.is_empty() {
        return Err("empty label");
    }
    if label.len() > MAX_LABEL_LEN {
        return Err("label longer than 63 characters");
    }
    if !label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
        return Err("labels may only contain letters, digits and '-'");
    }
    if label.starts_with('-') || label.ends_with('-') {
        return Err("labels may not start or end with '-'");
    }
    Ok(())
}

/// A hostname resolution result.
#[derive(Debug)]
pub struct HostMatch<'t, V> {
    pub key: &'t RouteKey,
    pub value: &'t V,
}

impl<V> HostMatch<'_, V> {
    /// The pattern the value was bound under, e.g. `*.example.com`.
    pub fn pattern(&self) -> String {
        self.key.format_with(&KeyFormat::HOSTNAME)
    }
}

/// Maps hostname patterns to values (certificates, applications, ...).
///
/// Lookups are synchronous and allocation-light so they can run inside a TLS
/// server-name callback.
pub struct HostRouter<V> {
    tree: RouteTree<V>,
}

impl<V> HostRouter<V> {
    pub fn new() -> Self {
        Self {
            tree: RouteTree::new(),
        }
    }

    /// Bind `value` to a hostname pattern. Binding the same pattern twice is
    /// an error.
    pub fn bind(&mut self, pattern: &str, value: V) -> RouteResult<()> {
        let key = parse_hostname_pattern(pattern, true)?;
        self.tree.add(key, value).map_err(|e| e.with_pattern(pattern))
    }

    /// The value of the most specific binding for `hostname`, if any.
    pub fn resolve(&self, hostname: &str) -> Option<&V> {
        self.resolve_match(hostname).map(|found| found.value)
    }

    /// Like [`resolve`](Self::resolve), also returning the bound key.
    pub fn resolve_match(&self, hostname: &str) -> Option<HostMatch<'_, V>> {
        let candidate = hostname_candidate(hostname)?;
        self.best_match(&candidate).map(|found| HostMatch {
            key: found.key,
            value: found.value,
        })
    }

    /// The binding of the catch-all pattern `*`. Used when a client presents
    /// no usable hostname at all.
    pub fn default_match(&self) -> Option<HostMatch<'_, V>> {
        self.tree
            .find_most_specific(&RouteKey::empty())
            .find(|m| m.key.is_wildcard())
            .map(|found| HostMatch {
                key: found.key,
                value: found.value,
            })
    }

    pub fn default_binding(&self) -> Option<&V> {
        self.default_match().map(|found| found.value)
    }

    /// A new router holding only the bindings needed to serve `patterns`.
    ///
    /// An exact name contributes the binding that would resolve it. A
    /// wildcard name contributes every binding under it, plus the nearest
    /// enclosing wildcard when the pattern itself is not bound. A pattern
    /// that contributes nothing is an error.
    pub fn subset<S: AsRef<str>>(&self, patterns: &[S]) -> RouteResult<HostRouter<V>>
    where
        V: Clone,
    {
        let mut result = HostRouter::new();

        for pattern in patterns {
            let pattern = pattern.as_ref();
            let key = parse_hostname_pattern(pattern, true)?;
            let mut found = BTreeMap::new();

            if key.is_wildcard() {
                // The bare parent name is not covered by its own wildcard.
                let parent = key.with_wildcard(false);
                found.extend(
                    self.tree
                        .find_subtree(&key)
                        .into_iter()
                        .filter(|(bound, _)| *bound != parent),
                );

                if self.tree.find_exact(&key).is_none() {
                    let enclosing = self
                        .tree
                        .find_most_specific(&parent)
                        .find(|m| m.key.is_wildcard() && m.matched_len < key.len());
                    if let Some(m) = enclosing {
                        found.insert(m.key.clone(), m.value.clone());
                    }
                }
            } else if let Some(m) = self.best_match(&key) {
                found.insert(m.key.clone(), m.value.clone());
            }

            if found.is_empty() {
                return Err(RouteError::NoMatch {
                    pattern: pattern.to_string(),
                });
            }

            for (bound, value) in found {
                if result.tree.find_exact(&bound).is_none() {
                    result.tree.add(bound, value)?;
                }
            }
        }

        Ok(result)
    }

    /// Every binding as `(pattern, value)`.
    pub fn iter(&self) -> impl Iterator<Item = (String, &V)> + '_ {
        self.tree
            .iter()
            .map(|(key, value)| (key.format_with(&KeyFormat::HOSTNAME), value))
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Subdomain wildcards must consume at least one label, so
    /// `*.example.com` does not answer for `example.com`.
    fn best_match(&self, candidate: &RouteKey) -> Option<RouteMatch<'_, V>> {
        self.tree
            .find_most_specific(candidate)
            .find(|m| !(m.key.is_wildcard() && m.remainder.is_empty()))
    }
}

impl<V> Default for HostRouter<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: fmt::Debug> fmt::Debug for HostRouter<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
