use std::fmt;
use std::sync::Arc;

/// An immutable, ordered sequence of name segments plus a wildcard flag.
///
/// Keys are the addressing unit of a [`RouteTree`](crate::RouteTree).
/// Hostname keys hold DNS labels TLD-first; path keys hold URL path
/// components root-first. A wildcard key stands for itself followed by any
/// number of further segments.
///
/// The segment storage is shared, so cloning a key never copies strings.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey {
    segments: Arc<[String]>,
    wildcard: bool,
}

impl RouteKey {
    /// Build a key by collecting `segments`.
    ///
    /// No grammar checks happen here; use the hostname or path parsers for
    /// untrusted input.
    pub fn new<I, S>(segments: I, wildcard: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
            wildcard,
        }
    }

    /// Build a key around an already-shared segment list without copying it.
    pub fn from_shared(segments: Arc<[String]>, wildcard: bool) -> Self {
        Self { segments, wildcard }
    }

    /// The empty, non-wildcard key.
    pub fn empty() -> Self {
        Self::new(Vec::<String>::new(), false)
    }

    /// The key that matches everything: no segments, wildcard.
    pub fn full_wildcard() -> Self {
        Self::new(Vec::<String>::new(), true)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn shared_segments(&self) -> &Arc<[String]> {
        &self.segments
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Same segments with the given wildcard flag.
    pub fn with_wildcard(&self, wildcard: bool) -> Self {
        Self {
            segments: Arc::clone(&self.segments),
            wildcard,
        }
    }

    /// The first `len` segments as a non-wildcard key.
    pub fn prefix(&self, len: usize) -> Self {
        let len = len.min(self.segments.len());
        if len == self.segments.len() && !self.wildcard {
            return self.clone();
        }
        Self::new(self.segments[..len].iter().cloned(), false)
    }

    /// The segments from `start` onward as a non-wildcard key. This is the
    /// remainder left after a match consumed `start` segments.
    pub fn suffix(&self, start: usize) -> Self {
        let start = start.min(self.segments.len());
        if start == 0 && !self.wildcard {
            return self.clone();
        }
        Self::new(self.segments[start..].iter().cloned(), false)
    }

    /// `self` followed by `other`; the result takes `other`'s wildcard flag.
    pub fn concat(&self, other: &RouteKey) -> Self {
        Self::new(
            self.segments.iter().chain(other.segments.iter()).cloned(),
            other.wildcard,
        )
    }

    /// Same key with the segment order reversed.
    pub fn reversed(&self) -> Self {
        Self::new(self.segments.iter().rev().cloned(), self.wildcard)
    }

    /// Render the key according to `format`.
    pub fn format_with(&self, format: &KeyFormat) -> String {
        let mut parts: Vec<&str> = self.segments.iter().map(String::as_str).collect();
        if format.reverse {
            parts.reverse();
        }
        if self.wildcard {
            if format.reverse {
                parts.insert(0, format.wildcard);
            } else {
                parts.push(format.wildcard);
            }
        }

        let rendered = format!("{}{}{}", format.prefix, parts.join(format.separator), format.suffix);
        if format.quote {
            format!("\"{}\"", rendered)
        } else {
            rendered
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_with(&KeyFormat::PATH))
    }
}

impl fmt::Debug for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_with(&KeyFormat::DEBUG))
    }
}

/// How a [`RouteKey`] is turned into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyFormat {
    pub prefix: &'static str,
    pub separator: &'static str,
    pub suffix: &'static str,
    /// Marker emitted for wildcard keys, first when `reverse` is set and last
    /// otherwise.
    pub wildcard: &'static str,
    /// Emit segments last-to-first.
    pub reverse: bool,
    /// Wrap the result in double quotes.
    pub quote: bool,
}

impl KeyFormat {
    /// `/a/b`, `/a/b/`, `/a/*`.
    pub const PATH: KeyFormat = KeyFormat {
        prefix: "/",
        separator: "/",
        suffix: "",
        wildcard: "*",
        reverse: false,
        quote: false,
    };

    /// `www.example.com`, `*.example.com`, `*`.
    pub const HOSTNAME: KeyFormat = KeyFormat {
        prefix: "",
        separator: ".",
        suffix: "",
        wildcard: "*",
        reverse: true,
        quote: false,
    };

    /// `["a", "b", *]`-style rendering for debugging.
    pub const DEBUG: KeyFormat = KeyFormat {
        prefix: "[",
        separator: ", ",
        suffix: "]",
        wildcard: "*",
        reverse: false,
        quote: false,
    };

    pub fn quoted(mut self) -> Self {
        self.quote = true;
        self
    }
}
