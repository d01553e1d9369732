//! Per-turn object identity bookkeeping.
//!
//! A [`SerializationContext`] lives for exactly one request/response turn.
//! Each side mints ids for the nodes it sends; the peer's id count is merged
//! with [`SerializationContext::expand`] so both counters converge after every
//! exchange. Identities live in a side table owned by the context, the nodes
//! themselves are never marked.

use std::collections::{BTreeMap, HashMap};

use super::CodecError;
use super::node::{Datum, Node};
use super::xml::{XmlWriter, format_number};

#[derive(Debug, Default)]
pub struct SerializationContext {
    /// node address -> sid
    ids: HashMap<usize, u64>,
    /// sid -> node. Holding the node keeps its address unique while tracked.
    nodes: BTreeMap<u64, Node>,
    counter: u64,
}

impl SerializationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest id minted or accepted from the peer.
    pub fn count(&self) -> u64 {
        self.counter
    }

    /// Number of tracked nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn id_of(&self, node: &Node) -> Option<u64> {
        self.ids.get(&node.addr()).copied()
    }

    pub fn resolve(&self, id: u64) -> Option<Node> {
        self.nodes.get(&id).cloned()
    }

    /// Id of `node`, minting one if needed.
    ///
    /// A newly tracked node has its whole reachable subgraph registered before
    /// this returns, so the envelope can refer to every node by id.
    pub fn sid(&mut self, node: &Node) -> u64 {
        if let Some(id) = self.id_of(node) {
            return id;
        }
        let id = self.track(node);

        let mut pending = vec![node.clone()];
        while let Some(next) = pending.pop() {
            for (_, value) in next.fields() {
                if let Datum::Node(child) = value
                    && self.id_of(&child).is_none()
                {
                    self.track(&child);
                    pending.push(child);
                }
            }
        }
        id
    }

    /// Register `datum` if it is a node; literals need no id.
    pub fn register(&mut self, datum: &Datum) {
        if let Datum::Node(node) = datum {
            self.sid(node);
        }
    }

    fn track(&mut self, node: &Node) -> u64 {
        let id = self.mint();
        self.ids.insert(node.addr(), id);
        self.nodes.insert(id, node.clone());
        id
    }

    fn mint(&mut self) -> u64 {
        loop {
            self.counter += 1;
            if !self.nodes.contains_key(&self.counter) {
                return self.counter;
            }
        }
    }

    /// Write `datum` into `out`.
    ///
    /// - `depth > 1`: the node's field values are written directly, one level
    ///   shallower, without an enclosing `obj`
    /// - `depth == 1`: `obj` with `sid` and one `fld` per field
    /// - `depth < 1`: `obj` with only the `sid` (a reference)
    ///
    /// Literals are written the same way at every depth.
    pub(crate) fn serialize(&mut self, datum: &Datum, depth: i32, out: &mut XmlWriter) {
        match datum {
            Datum::Number(n) => out.leaf("num", &format_number(*n)),
            Datum::Text(s) => out.leaf("str", s),
            Datum::Node(node) if depth > 1 => {
                for (_, value) in node.fields() {
                    self.serialize(&value, depth - 1, out);
                }
            }
            Datum::Node(node) => {
                let id = self.sid(node);
                out.open("obj");
                out.leaf("sid", &id.to_string());
                if depth == 1 {
                    for (name, value) in node.fields() {
                        out.open("fld");
                        out.leaf("idx", &name);
                        out.open("val");
                        self.serialize(&value, 0, out);
                        out.close("val");
                        out.close("fld");
                    }
                }
                out.close("obj");
            }
        }
    }

    /// Write every tracked node as a full definition.
    pub(crate) fn dump(&mut self, out: &mut XmlWriter) {
        let table = Node::with_fields(
            self.nodes
                .iter()
                .map(|(id, node)| (id.to_string(), Datum::Node(node.clone()))),
        );
        self.serialize(&Datum::Node(table), 2, out);
    }

    /// Merge the peer's id count.
    ///
    /// The local counter grows to at least `count_text`; every id the peer
    /// minted that this side has not seen gets an empty placeholder node, to
    /// be filled by the context dump that follows. `defined` is the number of
    /// definitions that dump carries; a count claiming more new ids than that
    /// is rejected before anything is allocated.
    pub fn expand(&mut self, count_text: &str, defined: usize) -> Result<u64, CodecError> {
        let target: u64 = count_text
            .trim()
            .parse()
            .map_err(|_| CodecError::BadCount(count_text.to_string()))?;
        if target.saturating_sub(self.counter) > defined as u64 {
            return Err(CodecError::BadCount(count_text.to_string()));
        }
        for id in (self.counter + 1)..=target {
            if !self.nodes.contains_key(&id) {
                let placeholder = Node::new();
                self.ids.insert(placeholder.addr(), id);
                self.nodes.insert(id, placeholder);
            }
        }
        self.counter = self.counter.max(target);
        Ok(self.counter)
    }

    /// Forget every identity and reset the counter.
    pub fn release(&mut self) {
        self.ids.clear();
        self.nodes.clear();
        self.counter = 0;
    }
}
