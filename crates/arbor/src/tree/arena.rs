//! Node storage.
//!
//! Nodes live in immutable segments. Each parse appends one new segment to
//! the segments of the tree it reuses from, so reused subtrees are shared
//! by reference and keep their [`NodeId`].

use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::table::{FieldId, StateId, SymbolId};

/// Stable identity of a node within a tree and the trees reusing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    segment: u32,
    index: u32,
}

impl NodeId {
    /// The segment holding the node.
    #[must_use]
    pub fn segment(self) -> u32 {
        self.segment
    }

    /// Position of the node in its segment.
    #[must_use]
    pub fn index(self) -> u32 {
        self.index
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.segment, self.index)
    }
}

pub(crate) const EXTRA: u8 = 1;
pub(crate) const IS_ERROR: u8 = 2;
pub(crate) const HAS_ERROR: u8 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NodeData {
    pub kind: SymbolId,
    /// Length in bytes; positions are derived from the parent.
    pub len: u32,
    /// Bytes past the end that influenced how this node was built.
    pub lookahead: u32,
    /// State the first token was lexed in.
    pub lex_state: StateId,
    /// State on the stack below the node when it was pushed.
    pub parse_state: StateId,
    /// State the token after the node was lexed in.
    pub trailing_lex_state: StateId,
    /// Non-extra tokens covered.
    pub token_count: u32,
    pub flags: u8,
    pub first_edge: u32,
    pub edge_count: u32,
}

impl NodeData {
    pub fn is_extra(&self) -> bool {
        self.flags & EXTRA != 0
    }

    pub fn is_error(&self) -> bool {
        self.flags & IS_ERROR != 0
    }

    pub fn has_error(&self) -> bool {
        self.flags & (IS_ERROR | HAS_ERROR) != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Edge {
    pub node: NodeId,
    pub field: FieldId,
    pub alias: SymbolId,
}

#[derive(Debug, Default)]
pub(crate) struct Segment {
    nodes: Vec<NodeData>,
    edges: Vec<Edge>,
}

/// Read access to nodes spread over segments.
pub(crate) trait NodeStore {
    fn node(&self, id: NodeId) -> &NodeData;
    fn edges(&self, id: NodeId) -> &[Edge];
}

fn segment_node(segment: &Segment, index: u32) -> &NodeData {
    &segment.nodes[index as usize]
}

fn segment_edges<'s>(segment: &'s Segment, data: &NodeData) -> &'s [Edge] {
    let first = data.first_edge as usize;
    &segment.edges[first..first + data.edge_count as usize]
}

impl NodeStore for [Arc<Segment>] {
    fn node(&self, id: NodeId) -> &NodeData {
        segment_node(&self[id.segment as usize], id.index)
    }

    fn edges(&self, id: NodeId) -> &[Edge] {
        let segment = &self[id.segment as usize];
        segment_edges(segment, segment_node(segment, id.index))
    }
}

/// The segments of a tree being built: the reused ones plus a growing one.
pub(crate) struct Arena {
    segments: Vec<Arc<Segment>>,
    current: Segment,
}

impl Arena {
    pub fn new(segments: Vec<Arc<Segment>>) -> Self {
        Self {
            segments,
            current: Segment::default(),
        }
    }

    fn current_index(&self) -> u32 {
        u32::try_from(self.segments.len()).unwrap_or(u32::MAX)
    }

    /// Adds a node whose children are `children`; `data.first_edge` and
    /// `data.edge_count` are filled in here.
    pub fn push(&mut self, mut data: NodeData, children: &[Edge]) -> NodeId {
        data.first_edge = u32::try_from(self.current.edges.len()).unwrap_or(u32::MAX);
        data.edge_count = u32::try_from(children.len()).unwrap_or(u32::MAX);
        self.current.edges.extend_from_slice(children);
        let index = u32::try_from(self.current.nodes.len()).unwrap_or(u32::MAX);
        self.current.nodes.push(data);
        NodeId {
            segment: self.current_index(),
            index,
        }
    }

    /// Seals the current segment. Beyond `max_segments` segments, every node
    /// reachable from `root` is copied into a single fresh segment.
    pub fn finish(mut self, root: NodeId, max_segments: usize) -> (Vec<Arc<Segment>>, NodeId) {
        if !self.current.nodes.is_empty() || self.segments.is_empty() {
            self.segments.push(Arc::new(self.current));
        }
        if self.segments.len() <= max_segments {
            return (self.segments, root);
        }
        debug!(segments = self.segments.len(), "compacting tree");
        compact(&self.segments, root)
    }
}

impl NodeStore for Arena {
    fn node(&self, id: NodeId) -> &NodeData {
        if id.segment == self.current_index() {
            segment_node(&self.current, id.index)
        } else {
            self.segments.as_slice().node(id)
        }
    }

    fn edges(&self, id: NodeId) -> &[Edge] {
        if id.segment == self.current_index() {
            segment_edges(&self.current, segment_node(&self.current, id.index))
        } else {
            self.segments.as_slice().edges(id)
        }
    }
}

fn compact(segments: &[Arc<Segment>], root: NodeId) -> (Vec<Arc<Segment>>, NodeId) {
    let mut fresh = Segment::default();
    let mut renumbered: FxHashMap<NodeId, u32> = FxHashMap::default();
    let mut queue = VecDeque::from([root]);
    renumbered.insert(root, 0);
    fresh.nodes.push(segments.node(root).clone());

    while let Some(old) = queue.pop_front() {
        let new = renumbered[&old] as usize;
        let first = fresh.edges.len();
        for edge in segments.edges(old) {
            let index = match renumbered.get(&edge.node) {
                Some(index) => *index,
                None => {
                    let index = u32::try_from(fresh.nodes.len()).unwrap_or(u32::MAX);
                    fresh.nodes.push(segments.node(edge.node).clone());
                    renumbered.insert(edge.node, index);
                    queue.push_back(edge.node);
                    index
                }
            };
            fresh.edges.push(Edge {
                node: NodeId { segment: 0, index },
                ..*edge
            });
        }
        let data = &mut fresh.nodes[new];
        data.first_edge = u32::try_from(first).unwrap_or(u32::MAX);
        data.edge_count = u32::try_from(fresh.edges.len() - first).unwrap_or(u32::MAX);
    }
    (
        vec![Arc::new(fresh)],
        NodeId {
            segment: 0,
            index: 0,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{NO_ALIAS, NO_FIELD};

    fn leaf(kind: SymbolId, len: u32) -> NodeData {
        NodeData {
            kind,
            len,
            lookahead: 1,
            lex_state: 0,
            parse_state: 0,
            trailing_lex_state: 0,
            token_count: 1,
            flags: 0,
            first_edge: 0,
            edge_count: 0,
        }
    }

    fn edge(node: NodeId) -> Edge {
        Edge {
            node,
            field: NO_FIELD,
            alias: NO_ALIAS,
        }
    }

    fn build(base: Vec<Arc<Segment>>) -> (Arena, NodeId) {
        let mut arena = Arena::new(base);
        let a = arena.push(leaf(2, 1), &[]);
        let b = arena.push(leaf(3, 2), &[]);
        let parent = arena.push(leaf(4, 3), &[edge(a), edge(b)]);
        (arena, parent)
    }

    #[test]
    fn test_nodes_and_edges() {
        let (arena, parent) = build(Vec::new());
        let children: Vec<SymbolId> = arena
            .edges(parent)
            .iter()
            .map(|e| arena.node(e.node).kind)
            .collect();
        assert_eq!(children, [2, 3]);
        let (segments, root) = arena.finish(parent, 4);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments.as_slice().node(root).kind, 4);
    }

    #[test]
    fn test_reused_segments_keep_ids() {
        let (arena, old_root) = build(Vec::new());
        let (segments, old_root) = arena.finish(old_root, 4);
        let mut arena = Arena::new(segments);
        let extra = arena.push(leaf(5, 1), &[]);
        let root = arena.push(leaf(6, 4), &[edge(old_root), edge(extra)]);
        assert_eq!(root.segment(), 1);
        let (segments, root) = arena.finish(root, 4);
        assert_eq!(segments.as_slice().edges(root)[0].node, old_root);
    }

    #[test]
    fn test_compaction_renumbers_reachable_nodes() {
        let (arena, old_root) = build(Vec::new());
        let (segments, old_root) = arena.finish(old_root, 4);
        let mut arena = Arena::new(segments);
        let root = arena.push(leaf(6, 3), &[edge(old_root)]);
        let (segments, root) = arena.finish(root, 1);
        assert_eq!(segments.len(), 1);
        assert_eq!(root, NodeId { segment: 0, index: 0 });
        let store = segments.as_slice();
        let child = store.edges(root)[0].node;
        assert_eq!(store.node(child).kind, 4);
        let grandchildren: Vec<SymbolId> =
            store.edges(child).iter().map(|e| store.node(e.node).kind).collect();
        assert_eq!(grandchildren, [2, 3]);
    }
}
