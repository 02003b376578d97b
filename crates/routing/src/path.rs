use std::fmt;

use crate::error::{RouteError, RouteResult};
use crate::key::{KeyFormat, RouteKey};
use crate::tree::{MostSpecific, RouteTree};

/// Parse a mount pattern into a root-first key.
///
/// - `/a/b` -- exact: matches only `/a/b`
/// - `/a/b/` -- directory: matches only `/a/b/`; stored with a trailing empty
///   segment
/// - `/a/b/*` -- wildcard: matches `/a/b` and everything below it
///
/// Segments are `[-_.a-zA-Z0-9]+` and may not be `.` or `..`. The wildcard
/// form is rejected unless `allow_wildcard` is set.
pub fn parse_path_pattern(pattern: &str, allow_wildcard: bool) -> RouteResult<RouteKey> {
    let invalid = |reason: &str| RouteError::InvalidPath {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    let rest = pattern
        .strip_prefix('/')
        .ok_or_else(|| invalid("must start with '/'"))?;

    let mut segments: Vec<&str> = rest.split('/').collect();
    let mut wildcard = false;
    let mut directory = false;

    match segments.last() {
        Some(&"*") => {
            if !allow_wildcard {
                return Err(invalid("wildcards are not allowed here"));
            }
            wildcard = true;
            segments.pop();
        }
        Some(&"") => {
            directory = true;
            segments.pop();
        }
        _ => {}
    }

    for segment in &segments {
        if segment.is_empty() {
            return Err(invalid("empty path component"));
        }
        if *segment == "." || *segment == ".." {
            return Err(invalid("'.' and '..' are not allowed"));
        }
        if !segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        {
            return Err(invalid("components may only contain [-_.a-zA-Z0-9]"));
        }
    }

    let mut owned: Vec<String> = segments.into_iter().map(str::to_string).collect();
    if directory {
        owned.push(String::new());
    }

    Ok(RouteKey::new(owned, wildcard))
}

/// Split a request path into a lookup key. The query string and fragment are
/// dropped; a trailing `/` becomes a trailing empty segment, and an empty path
/// is treated as `/`.
pub fn request_path_candidate(path: &str) -> RouteKey {
    let path = path.split(&['?', '#'][..]).next().unwrap_or("");
    let path = path.strip_prefix('/').unwrap_or(path);
    RouteKey::new(path.split('/'), false)
}

/// One dispatch candidate.
#[derive(Debug)]
pub struct PathMatch<'t, V> {
    /// The mount key the value was bound under.
    pub key: &'t RouteKey,
    pub value: &'t V,
    /// Request segments consumed by the mount.
    pub base: RouteKey,
    /// Request segments left for the next routing stage.
    pub remainder: RouteKey,
}

impl<V> PathMatch<'_, V> {
    /// The mount pattern, e.g. `/files/*`.
    pub fn pattern(&self) -> String {
        self.key.format_with(&KeyFormat::PATH)
    }

    /// The consumed prefix as a path, e.g. `/files`.
    pub fn base_path(&self) -> String {
        self.base.format_with(&KeyFormat::PATH)
    }

    /// The unconsumed suffix as a path, e.g. `/a/b`.
    pub fn remainder_path(&self) -> String {
        self.remainder.format_with(&KeyFormat::PATH)
    }
}

/// Maps path patterns to handlers and produces dispatch candidates for
/// request paths, most specific first.
pub struct PathRouter<V> {
    tree: RouteTree<V>,
}

impl<V> PathRouter<V> {
    pub fn new() -> Self {
        Self {
            tree: RouteTree::new(),
        }
    }

    /// Bind `value` to a mount pattern. Binding the same pattern twice is an
    /// error.
    pub fn bind(&mut self, pattern: &str, value: V) -> RouteResult<()> {
        let key = parse_path_pattern(pattern, true)?;
        self.tree.add(key, value).map_err(|e| e.with_pattern(pattern))
    }

    /// Candidates for `request_path`, most specific first. Callers try each
    /// one in turn until a handler accepts the request.
    pub fn dispatch(&self, request_path: &str) -> Dispatch<'_, V> {
        self.dispatch_key(&request_path_candidate(request_path))
    }

    /// Like [`dispatch`](Self::dispatch) for an already-split path.
    pub fn dispatch_key(&self, candidate: &RouteKey) -> Dispatch<'_, V> {
        Dispatch {
            inner: self.tree.find_most_specific(candidate),
        }
    }

    /// Every binding as `(pattern, value)`.
    pub fn iter(&self) -> impl Iterator<Item = (String, &V)> + '_ {
        self.tree
            .iter()
            .map(|(key, value)| (key.format_with(&KeyFormat::PATH), value))
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

impl<V> Default for PathRouter<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: fmt::Debug> fmt::Debug for PathRouter<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Lazy, restartable sequence of [`PathMatch`]es.
pub struct Dispatch<'t, V> {
    inner: MostSpecific<'t, V>,
}

impl<V> Clone for Dispatch<'_, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<'t, V> Iterator for Dispatch<'t, V> {
    type Item = PathMatch<'t, V>;

    fn next(&mut self) -> Option<Self::Item> {
        let found = self.inner.next()?;
        // A match consumes exactly the segments of its bound key.
        Some(PathMatch {
            key: found.key,
            value: found.value,
            base: found.key.with_wildcard(false),
            remainder: found.remainder,
        })
    }
}
