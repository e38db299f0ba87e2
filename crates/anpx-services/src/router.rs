//! Longest-prefix path router — a trie over `/`-delimited segments mapping
//! advertised path prefixes to the connection that registered them.
//!
//! Grounded on `original_source/anp_proxy/gateway/routing.py`'s `PathRouter`;
//! re-expressed in the teacher's `DashMap`-free, single-owner style since the
//! whole router sits behind one `ConnectionRegistry`-held lock (`spec.md` §5).

use std::collections::HashMap;

#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<String, TrieNode>,
    connection_id: Option<String>,
}

/// Aggregate counters returned by [`PathRouter::stats`], mirrored in the
/// Gateway's `/stats` admin endpoint.
#[derive(Debug, Clone, Default)]
pub struct RouterStats {
    pub total_routes: usize,
    pub unique_connections: usize,
    pub tree_depth: usize,
}

/// A prefix trie of path segments. Not thread-safe by itself — the Gateway
/// holds it behind the same serialising lock as the connection registry and
/// pending-request table (`spec.md` §5 shared-resource policy).
#[derive(Debug, Default)]
pub struct PathRouter {
    root: TrieNode,
    route_count: usize,
}

impl PathRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `path` for `connection_id`. Replaces any prior owner of the
    /// same exact prefix (the earlier registration is evicted from that
    /// prefix only; its other prefixes are unaffected).
    pub fn add_route(&mut self, path: &str, connection_id: &str) {
        let segments = split_path(&normalize_path(path));
        let mut node = &mut self.root;
        for segment in &segments {
            node = node
                .children
                .entry(segment.clone())
                .or_insert_with(TrieNode::default);
        }
        if node.connection_id.is_none() {
            self.route_count += 1;
        }
        node.connection_id = Some(connection_id.to_string());
    }

    /// Removes the route registered at exactly `path`. Returns whether a
    /// route was present. Prunes now-empty nodes bottom-up.
    pub fn remove_route(&mut self, path: &str) -> bool {
        let segments = split_path(&normalize_path(path));
        if !Self::remove_at(&mut self.root, &segments) {
            return false;
        }
        self.route_count -= 1;
        true
    }

    fn remove_at(node: &mut TrieNode, segments: &[String]) -> bool {
        match segments.split_first() {
            None => {
                if node.connection_id.take().is_some() {
                    true
                } else {
                    false
                }
            }
            Some((head, rest)) => {
                let Some(child) = node.children.get_mut(head) else {
                    return false;
                };
                let removed = Self::remove_at(child, rest);
                if removed && child.children.is_empty() && child.connection_id.is_none() {
                    node.children.remove(head);
                }
                removed
            }
        }
    }

    /// Longest-prefix lookup: walks the trie one segment at a time,
    /// remembering the deepest visited terminal; returns it (or none) as
    /// soon as the walk hits an absent child.
    pub fn find_route(&self, request_path: &str) -> Option<String> {
        let segments = split_path(&normalize_path(request_path));
        let mut node = &self.root;
        let mut best = node.connection_id.clone();

        for segment in &segments {
            match node.children.get(segment) {
                Some(child) => {
                    node = child;
                    if node.connection_id.is_some() {
                        best = node.connection_id.clone();
                    }
                }
                None => break,
            }
        }
        best
    }

    /// Removes every route owned by `connection_id`. Runs in O(depth · routes)
    /// but is only invoked once per disconnect, not per lookup.
    pub fn remove_connection_routes(&mut self, connection_id: &str) -> usize {
        let targets = self.list_routes_for(connection_id);
        let mut removed = 0;
        for path in targets {
            if self.remove_route(&path) {
                removed += 1;
            }
        }
        removed
    }

    fn list_routes_for(&self, connection_id: &str) -> Vec<String> {
        self.list_routes()
            .into_iter()
            .filter(|(_, id)| id == connection_id)
            .map(|(path, _)| path)
            .collect()
    }

    /// All registered `(path, connection_id)` pairs.
    pub fn list_routes(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        Self::collect(&self.root, &mut Vec::new(), &mut out);
        out
    }

    fn collect(node: &TrieNode, prefix: &mut Vec<String>, out: &mut Vec<(String, String)>) {
        if let Some(id) = &node.connection_id {
            let path = if prefix.is_empty() {
                "/".to_string()
            } else {
                format!("/{}", prefix.join("/"))
            };
            out.push((path, id.clone()));
        }
        for (segment, child) in &node.children {
            prefix.push(segment.clone());
            Self::collect(child, prefix, out);
            prefix.pop();
        }
    }

    pub fn stats(&self) -> RouterStats {
        let routes = self.list_routes();
        let unique: std::collections::HashSet<_> = routes.iter().map(|(_, id)| id.clone()).collect();
        RouterStats {
            total_routes: routes.len(),
            unique_connections: unique.len(),
            tree_depth: Self::depth(&self.root),
        }
    }

    fn depth(node: &TrieNode) -> usize {
        node.children
            .values()
            .map(|c| 1 + Self::depth(c))
            .max()
            .unwrap_or(0)
    }
}

/// Strips query string and fragment, ensures a leading slash, strips a
/// trailing slash unless the path is the root.
fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    let path = path.split(['?', '#']).next().unwrap_or("/");
    let mut path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    path
}

fn split_path(path: &str) -> Vec<String> {
    if path == "/" {
        return Vec::new();
    }
    path.trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
