use std::collections::BTreeMap;
use std::fmt;

use crate::error::{RouteError, RouteResult};
use crate::key::RouteKey;

const ROOT: usize = 0;

/// A trie over [`RouteKey`] segments.
///
/// Every node can carry two bindings: an exact one, matched only when a
/// candidate ends at that node, and a wildcard one, matched by any candidate
/// that passes through the node (the wildcard consumes all remaining
/// segments). Nodes live in a flat arena and refer to their children by index.
pub struct RouteTree<V> {
    nodes: Vec<TrieNode<V>>,
    len: usize,
}

struct TrieNode<V> {
    exact: Option<Binding<V>>,
    wildcard: Option<Binding<V>>,
    children: BTreeMap<String, usize>,
}

struct Binding<V> {
    key: RouteKey,
    value: V,
}

impl<V> TrieNode<V> {
    fn new() -> Self {
        Self {
            exact: None,
            wildcard: None,
            children: BTreeMap::new(),
        }
    }
}

impl<V> RouteTree<V> {
    /// Create a new empty tree.
    pub fn new() -> Self {
        Self {
            nodes: vec![TrieNode::new()],
            len: 0,
        }
    }

    /// Bind `value` to `key`.
    ///
    /// Walks (or creates) one node per segment, then fills the exact or
    /// wildcard slot of the final node depending on `key.is_wildcard()`. An
    /// already-filled slot is an error and leaves the existing binding alone.
    pub fn add(&mut self, key: RouteKey, value: V) -> RouteResult<()> {
        let mut current = ROOT;
        for segment in key.segments() {
            current = match self.nodes[current].children.get(segment.as_str()) {
                Some(&child) => child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(TrieNode::new());
                    self.nodes[current].children.insert(segment.clone(), child);
                    child
                }
            };
        }

        let node = &mut self.nodes[current];
        let slot = if key.is_wildcard() {
            &mut node.wildcard
        } else {
            &mut node.exact
        };

        if slot.is_some() {
            return Err(RouteError::DuplicateBinding {
                key: format!("{:?}", key),
            });
        }

        *slot = Some(Binding { key, value });
        self.len += 1;
        Ok(())
    }

    /// The value bound to exactly `key` (same segments, same wildcard flag).
    pub fn find_exact(&self, key: &RouteKey) -> Option<&V> {
        let node = &self.nodes[self.find_node(key.segments())?];
        let slot = if key.is_wildcard() {
            &node.wildcard
        } else {
            &node.exact
        };
        slot.as_ref().map(|binding| &binding.value)
    }

    /// All bindings matching `candidate`, most specific first.
    ///
    /// The walk descends through exact children as far as the candidate's
    /// segments allow, then unwinds toward the root. At each depth an exact
    /// binding (only possible where the candidate ends) is yielded before the
    /// wildcard binding of the same node. The candidate's own wildcard flag is
    /// ignored.
    ///
    /// The returned iterator is lazy and `Clone`; calling this again or
    /// cloning the iterator restarts the sequence.
    pub fn find_most_specific(&self, candidate: &RouteKey) -> MostSpecific<'_, V> {
        let mut path = Vec::with_capacity(candidate.len() + 1);
        path.push(ROOT);

        let mut current = ROOT;
        for segment in candidate.segments() {
            match self.nodes[current].children.get(segment.as_str()) {
                Some(&child) => {
                    path.push(child);
                    current = child;
                }
                None => break,
            }
        }

        let depth = Some(path.len() - 1);
        MostSpecific {
            tree: self,
            candidate: candidate.clone(),
            path,
            depth,
            phase: Phase::Exact,
        }
    }

    /// Every binding at or below `key`'s segments, keyed by bound key.
    ///
    /// The full wildcard (no segments) yields the whole tree.
    pub fn find_subtree(&self, key: &RouteKey) -> BTreeMap<RouteKey, V>
    where
        V: Clone,
    {
        match self.find_node(key.segments()) {
            Some(start) => self
                .iter_from(start)
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            None => BTreeMap::new(),
        }
    }

    /// All bindings in depth-first key order.
    pub fn iter(&self) -> Iter<'_, V> {
        self.iter_from(ROOT)
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn iter_from(&self, start: usize) -> Iter<'_, V> {
        Iter {
            tree: self,
            stack: vec![start],
            pending: Vec::with_capacity(2),
        }
    }

    fn find_node(&self, segments: &[String]) -> Option<usize> {
        let mut current = ROOT;
        for segment in segments {
            current = *self.nodes[current].children.get(segment.as_str())?;
        }
        Some(current)
    }
}

impl<V> Default for RouteTree<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: fmt::Debug> fmt::Debug for RouteTree<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// One result of [`RouteTree::find_most_specific`].
#[derive(Debug)]
pub struct RouteMatch<'t, V> {
    /// The key the value was bound under.
    pub key: &'t RouteKey,
    pub value: &'t V,
    /// How many candidate segments the binding consumed before any wildcard.
    pub matched_len: usize,
    /// Candidate segments left over; always empty for exact matches.
    pub remainder: RouteKey,
}

impl<V> Clone for RouteMatch<'_, V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            value: self.value,
            matched_len: self.matched_len,
            remainder: self.remainder.clone(),
        }
    }
}

#[derive(Clone, Copy)]
enum Phase {
    Exact,
    Wildcard,
}

/// Lazy most-specific-first match sequence.
pub struct MostSpecific<'t, V> {
    tree: &'t RouteTree<V>,
    candidate: RouteKey,
    /// Node index per depth along the walked candidate prefix.
    path: Vec<usize>,
    /// `None` once the root has been unwound.
    depth: Option<usize>,
    phase: Phase,
}

impl<V> Clone for MostSpecific<'_, V> {
    fn clone(&self) -> Self {
        Self {
            tree: self.tree,
            candidate: self.candidate.clone(),
            path: self.path.clone(),
            depth: self.depth,
            phase: self.phase,
        }
    }
}

impl<'t, V> Iterator for MostSpecific<'t, V> {
    type Item = RouteMatch<'t, V>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let depth = self.depth?;
            let tree = self.tree;
            let node = &tree.nodes[self.path[depth]];

            match self.phase {
                Phase::Exact => {
                    self.phase = Phase::Wildcard;
                    if depth == self.candidate.len() {
                        if let Some(binding) = &node.exact {
                            return Some(RouteMatch {
                                key: &binding.key,
                                value: &binding.value,
                                matched_len: depth,
                                remainder: RouteKey::empty(),
                            });
                        }
                    }
                }
                Phase::Wildcard => {
                    self.phase = Phase::Exact;
                    self.depth = depth.checked_sub(1);
                    if let Some(binding) = &node.wildcard {
                        return Some(RouteMatch {
                            key: &binding.key,
                            value: &binding.value,
                            matched_len: depth,
                            remainder: self.candidate.suffix(depth),
                        });
                    }
                }
            }
        }
    }
}

/// Depth-first iterator over every binding of a tree or subtree.
pub struct Iter<'t, V> {
    tree: &'t RouteTree<V>,
    stack: Vec<usize>,
    pending: Vec<&'t Binding<V>>,
}

impl<'t, V> Iterator for Iter<'t, V> {
    type Item = (&'t RouteKey, &'t V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(binding) = self.pending.pop() {
                return Some((&binding.key, &binding.value));
            }

            let tree = self.tree;
            let node = &tree.nodes[self.stack.pop()?];
            // Reversed so the smallest child is visited first.
            self.stack.extend(node.children.values().rev().copied());
            if let Some(binding) = &node.wildcard {
                self.pending.push(binding);
            }
            if let Some(binding) = &node.exact {
                self.pending.push(binding);
            }
        }
    }
}
