//! Value trees that cross the wire.
//!
//! A [`Datum`] is either a literal (number, text) or a shared [`Node`].
//! Nodes are reference-counted and interior-mutable so that the same node can
//! be reachable from several places (aliasing) or from itself (cycles); the
//! serialization context relies on node identity to encode each one once.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;

/// A value carried inside an envelope.
#[derive(Debug, Clone)]
pub enum Datum {
    Number(f64),
    Text(String),
    Node(Node),
}

impl Datum {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Self::Node(node) => Some(node),
            _ => None,
        }
    }
}

impl From<f64> for Datum {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for Datum {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Datum {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Node> for Datum {
    fn from(node: Node) -> Self {
        Self::Node(node)
    }
}

/// A non-primitive value: an ordered set of named fields.
///
/// Cloning a `Node` clones the handle, not the fields. Two clones are the same
/// node for identity purposes.
#[derive(Clone, Default)]
pub struct Node(Arc<Mutex<IndexMap<String, Datum>>>);

impl Node {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a node from `(name, value)` pairs, keeping their order.
    pub fn with_fields<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Datum>,
    {
        let node = Self::new();
        {
            let mut map = node.lock();
            for (k, v) in fields {
                map.insert(k.into(), v.into());
            }
        }
        node
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, Datum>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Address-based identity, stable for as long as any clone is alive.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn same(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn get(&self, name: &str) -> Option<Datum> {
        self.lock().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<Datum>) {
        self.lock().insert(name.into(), value.into());
    }

    pub fn remove(&self, name: &str) -> Option<Datum> {
        self.lock().shift_remove(name)
    }

    /// Snapshot of the fields in insertion order.
    pub fn fields(&self) -> Vec<(String, Datum)> {
        self.lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Replace every field at once.
    pub fn replace_fields(&self, fields: Vec<(String, Datum)>) {
        let mut map = self.lock();
        map.clear();
        map.extend(fields);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Build a list node: `length` plus one field per index.
    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Datum>,
    {
        let node = Self::new();
        {
            let mut map = node.lock();
            let mut len = 0usize;
            for (i, item) in items.into_iter().enumerate() {
                map.insert(i.to_string(), item);
                len = i + 1;
            }
            map.insert("length".to_string(), Datum::Number(len as f64));
        }
        node
    }

    /// Read a list node built by [`Node::list`]. `None` when `length` is absent
    /// or an index is missing.
    pub fn items(&self) -> Option<Vec<Datum>> {
        let map = self.lock();
        let len = map.get("length")?.as_number()?;
        if len < 0.0 || len.fract() != 0.0 {
            return None;
        }
        (0..len as usize)
            .map(|i| map.get(&i.to_string()).cloned())
            .collect()
    }
}

// Fields are not printed: a cyclic graph would recurse forever.
impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Node({:#x})", self.addr())
    }
}
