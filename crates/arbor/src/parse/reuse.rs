//! Finding subtrees of the previous tree that can be pushed unchanged.

use crate::edit::EditMap;
use crate::lexer::Token;
use crate::table::{ParseTable, StateId, SymbolId};
use crate::tree::arena::NodeStore;
use crate::tree::{NodeId, SyntaxTree};

/// A node of the old tree accepted for reuse.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Reused {
    pub node: NodeId,
    pub len: usize,
    pub state: StateId,
    pub trailing_lex_state: StateId,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    node: NodeId,
    start: usize,
    end: usize,
}

/// Walks the old tree alongside the parser. Queries arrive in increasing
/// position order, so the path to the last position is kept and only
/// unwound as far as needed.
pub(crate) struct ReuseCursor<'a> {
    tree: &'a SyntaxTree,
    map: EditMap,
    path: Vec<Frame>,
    pub reused: usize,
}

impl<'a> ReuseCursor<'a> {
    pub fn new(tree: &'a SyntaxTree, map: EditMap) -> Self {
        Self {
            tree,
            map,
            path: Vec::new(),
            reused: 0,
        }
    }

    pub fn tree(&self) -> &'a SyntaxTree {
        self.tree
    }

    fn root_frame(&self) -> Frame {
        let root = self.tree.root_node();
        Frame {
            node: root.id(),
            start: 0,
            end: root.end_byte(),
        }
    }

    /// The old nodes starting at `old_pos`, outermost first. The root is
    /// never offered.
    fn starting_at(&mut self, old_pos: usize) -> Vec<NodeId> {
        if self.path.last().is_none_or(|frame| old_pos < frame.start) {
            self.path = vec![self.root_frame()];
        }
        while self.path.len() > 1 && self.path.last().is_some_and(|f| old_pos >= f.end) {
            self.path.pop();
        }

        let tree = self.tree;
        let store = tree.segments();
        'descend: while let Some(&parent) = self.path.last() {
            let mut start = parent.start;
            for edge in store.edges(parent.node) {
                let end = start + store.node(edge.node).len as usize;
                if start <= old_pos && old_pos < end {
                    self.path.push(Frame {
                        node: edge.node,
                        start,
                        end,
                    });
                    continue 'descend;
                }
                start = end;
            }
            break;
        }

        self.path[1..]
            .iter()
            .filter(|frame| frame.start == old_pos)
            .map(|frame| frame.node)
            .collect()
    }

    /// The largest old node that can stand in for the input starting with
    /// `token`, given the parser's lexing state and top state.
    pub fn find(
        &mut self,
        table: &ParseTable,
        token: Token,
        lex_state: StateId,
        top: StateId,
    ) -> Option<Reused> {
        let segment = *self.map.segment_at(token.start)?;
        let old_pos = self.map.to_old(token.start)?;
        let tree = self.tree;

        for id in self.starting_at(old_pos) {
            let data = tree.data(id);
            let len = data.len as usize;
            let reach = old_pos + len + data.lookahead as usize;
            if data.has_error()
                || data.is_extra()
                || len == 0
                || reach > segment.old_end
                || data.lex_state != lex_state
                || data.parse_state != top
            {
                continue;
            }
            let Some(state) = table.next_state(top, data.kind) else {
                continue;
            };
            let first = self.first_token(id);
            if first != Some((token.symbol, token.len)) {
                continue;
            }
            self.reused += 1;
            return Some(Reused {
                node: id,
                len,
                state,
                trailing_lex_state: data.trailing_lex_state,
            });
        }
        None
    }

    /// Kind and length of the first non-empty leaf under `id`.
    fn first_token(&self, mut id: NodeId) -> Option<(SymbolId, usize)> {
        let store = self.tree.segments();
        loop {
            let data = store.node(id);
            if data.edge_count == 0 {
                return Some((data.kind, data.len as usize));
            }
            id = store
                .edges(id)
                .iter()
                .find(|edge| store.node(edge.node).len > 0)?
                .node;
        }
    }
}
