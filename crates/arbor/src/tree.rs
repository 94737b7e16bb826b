//! Syntax trees.
//!
//! A [`SyntaxTree`] never changes once its parse completes. Every node,
//! including hidden helper nodes, lives in the arena; the [`Node`] API
//! presents the visible tree on top of it, lifting the children of hidden
//! nodes into their parent.

use std::fmt::{self, Write as _};
use std::sync::Arc;
use text_size::{TextRange, TextSize};

use crate::language::Language;
use crate::table::{FieldId, SymbolId, NO_ALIAS, NO_FIELD};

pub(crate) mod arena;
mod cursor;
mod line_index;

use arena::{NodeData, NodeStore, Segment};
pub use arena::NodeId;
pub use cursor::TreeCursor;
use line_index::LineIndex;
pub use line_index::Point;

pub(crate) fn text_size(offset: usize) -> TextSize {
    TextSize::try_from(offset).unwrap_or(TextSize::from(u32::MAX))
}

struct TreeData {
    language: Language,
    text: Arc<str>,
    segments: Vec<Arc<Segment>>,
    root: NodeId,
    lines: LineIndex,
}

/// The result of a parse.
///
/// Cloning is cheap; clones share the same nodes.
#[derive(Clone)]
pub struct SyntaxTree {
    inner: Arc<TreeData>,
}

impl fmt::Debug for SyntaxTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyntaxTree")
            .field("language", &self.language().name())
            .field("root", &self.inner.root)
            .field("segments", &self.inner.segments.len())
            .finish_non_exhaustive()
    }
}

impl SyntaxTree {
    pub(crate) fn new(
        language: Language,
        text: &str,
        segments: Vec<Arc<Segment>>,
        root: NodeId,
    ) -> Self {
        Self {
            inner: Arc::new(TreeData {
                language,
                lines: LineIndex::new(text),
                text: Arc::from(text),
                segments,
                root,
            }),
        }
    }

    pub(crate) fn segments(&self) -> &[Arc<Segment>] {
        &self.inner.segments
    }

    pub(crate) fn data(&self, id: NodeId) -> &NodeData {
        self.segments().node(id)
    }

    /// The root node, spanning the whole text.
    #[must_use]
    pub fn root_node(&self) -> Node<'_> {
        Node {
            tree: self,
            id: self.inner.root,
            start: 0,
            field: NO_FIELD,
            alias: NO_ALIAS,
        }
    }

    /// The parsed text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.inner.text
    }

    /// The language the tree was parsed with.
    #[must_use]
    pub fn language(&self) -> &Language {
        &self.inner.language
    }

    /// A cursor positioned at the root.
    #[must_use]
    pub fn walk(&self) -> TreeCursor<'_> {
        TreeCursor::new(self.root_node())
    }

    /// The named nodes as an S-expression, e.g. `(expr (number) (number))`.
    #[must_use]
    pub fn to_sexp(&self) -> String {
        self.root_node().to_sexp()
    }

    /// An indented listing of every visible node with its byte range.
    #[must_use]
    pub fn debug_dump(&self) -> String {
        let mut out = String::new();
        dump(self.root_node(), 0, &mut out);
        out
    }

    /// Every token in order, hidden and extra ones included. Their texts
    /// concatenate to the parsed text.
    #[must_use]
    pub fn leaves(&self) -> Vec<Node<'_>> {
        self.root_node().leaves()
    }

    /// Returns `true` if the tree contains an `ERROR` node.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.data(self.inner.root).has_error()
    }

    /// Number of `ERROR` nodes not nested in another `ERROR` node.
    #[must_use]
    pub fn error_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self.inner.root];
        while let Some(id) = stack.pop() {
            let data = self.data(id);
            if data.is_error() {
                count += 1;
            } else if data.has_error() {
                stack.extend(self.segments().edges(id).iter().map(|e| e.node));
            }
        }
        count
    }

    /// Number of nodes in the arena reachable from the root.
    #[must_use]
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self.inner.root];
        while let Some(id) = stack.pop() {
            count += 1;
            stack.extend(self.segments().edges(id).iter().map(|e| e.node));
        }
        count
    }
}

fn dump(node: Node<'_>, depth: usize, out: &mut String) {
    let kind = node.kind();
    let indent = "  ".repeat(depth);
    let range = node.text_range();
    if node.is_named() {
        let _ = write!(out, "{indent}{kind}@{range:?}");
    } else {
        let _ = write!(out, "{indent}'{kind}'@{range:?}");
    }
    let children = node.children();
    if node.is_named() && children.is_empty() && !node.text().is_empty() {
        let _ = write!(out, " {:?}", node.text());
    }
    out.push('\n');
    for child in children {
        dump(child, depth + 1, out);
    }
}

/// A node of a [`SyntaxTree`], seen through the label its parent gave it.
#[derive(Clone, Copy)]
pub struct Node<'t> {
    tree: &'t SyntaxTree,
    id: NodeId,
    start: usize,
    field: FieldId,
    alias: SymbolId,
}

impl fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:?}", self.kind(), self.text_range())
    }
}

impl<'t> Node<'t> {
    fn data(&self) -> &'t NodeData {
        self.tree.data(self.id)
    }

    /// Identity of the node in the arena.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The node kind, after aliasing.
    #[must_use]
    pub fn kind_id(&self) -> SymbolId {
        if self.alias == NO_ALIAS {
            self.data().kind
        } else {
            self.alias
        }
    }

    /// The name of [`Node::kind_id`].
    #[must_use]
    pub fn kind(&self) -> &'t str {
        self.tree
            .language()
            .symbol_name(self.kind_id())
            .unwrap_or_default()
    }

    fn is_visible(&self) -> bool {
        self.tree
            .language()
            .table()
            .symbols
            .get(usize::from(self.kind_id()))
            .is_some_and(|s| s.visible)
    }

    /// Returns `true` for named kinds, `false` for anonymous literals.
    #[must_use]
    pub fn is_named(&self) -> bool {
        self.tree
            .language()
            .table()
            .symbols
            .get(usize::from(self.kind_id()))
            .is_some_and(|s| s.named)
    }

    /// Returns `true` for extras such as whitespace, comments and `ERROR`
    /// nodes produced by recovery.
    #[must_use]
    pub fn is_extra(&self) -> bool {
        self.data().is_extra()
    }

    /// Returns `true` for `ERROR` nodes.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.data().is_error()
    }

    /// Returns `true` if this node is or contains an `ERROR` node.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.data().has_error()
    }

    /// Returns `true` if the node has no children in the arena.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.data().edge_count == 0
    }

    /// Byte range of the node.
    #[must_use]
    pub fn text_range(&self) -> TextRange {
        TextRange::new(text_size(self.start_byte()), text_size(self.end_byte()))
    }

    /// First byte of the node.
    #[must_use]
    pub fn start_byte(&self) -> usize {
        self.start
    }

    /// One past the last byte of the node.
    #[must_use]
    pub fn end_byte(&self) -> usize {
        self.start + self.data().len as usize
    }

    /// Row and column of [`Node::start_byte`].
    #[must_use]
    pub fn start_position(&self) -> Point {
        self.tree.inner.lines.point(self.start_byte())
    }

    /// Row and column of [`Node::end_byte`].
    #[must_use]
    pub fn end_position(&self) -> Point {
        self.tree.inner.lines.point(self.end_byte())
    }

    /// The source text covered by the node.
    #[must_use]
    pub fn text(&self) -> &'t str {
        self.tree
            .text()
            .get(self.start_byte()..self.end_byte())
            .unwrap_or_default()
    }

    /// The field this node fills in its parent.
    #[must_use]
    pub fn field_name(&self) -> Option<&'t str> {
        self.tree.language().table().field_name(self.field)
    }

    /// All children in the arena, hidden ones included.
    #[must_use]
    pub fn raw_children(&self) -> Vec<Node<'t>> {
        let mut start = self.start;
        self.tree
            .segments()
            .edges(self.id)
            .iter()
            .map(|edge| {
                let child = Node {
                    tree: self.tree,
                    id: edge.node,
                    start,
                    field: edge.field,
                    alias: edge.alias,
                };
                start = child.end_byte();
                child
            })
            .collect()
    }

    /// The visible children. Children of hidden nodes take their place and
    /// inherit the hidden node's field.
    #[must_use]
    pub fn children(&self) -> Vec<Node<'t>> {
        let mut out = Vec::new();
        for child in self.raw_children() {
            child.lift_into(&mut out);
        }
        out
    }

    fn lift_into(self, out: &mut Vec<Node<'t>>) {
        if self.is_visible() {
            out.push(self);
            return;
        }
        for mut child in self.raw_children() {
            if child.field == NO_FIELD {
                child.field = self.field;
            }
            child.lift_into(out);
        }
    }

    /// The visible child at `index`.
    #[must_use]
    pub fn child(&self, index: usize) -> Option<Node<'t>> {
        self.children().into_iter().nth(index)
    }

    /// Number of visible children.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.children().len()
    }

    /// The visible, named children.
    #[must_use]
    pub fn named_children(&self) -> Vec<Node<'t>> {
        self.children().into_iter().filter(Node::is_named).collect()
    }

    /// The first visible child filling field `name`.
    #[must_use]
    pub fn child_by_field_name(&self, name: &str) -> Option<Node<'t>> {
        self.children()
            .into_iter()
            .find(|child| child.field_name() == Some(name))
    }

    /// Every non-empty token under this node, in order.
    #[must_use]
    pub fn leaves(&self) -> Vec<Node<'t>> {
        let mut leaves = Vec::new();
        let mut stack = vec![*self];
        while let Some(node) = stack.pop() {
            if node.is_leaf() {
                if node.end_byte() > node.start_byte() {
                    leaves.push(node);
                }
            } else {
                stack.extend(node.raw_children().into_iter().rev());
            }
        }
        leaves
    }

    /// The named nodes of this subtree as an S-expression.
    #[must_use]
    pub fn to_sexp(&self) -> String {
        let mut out = String::new();
        self.write_sexp(&mut out);
        out
    }

    fn write_sexp(&self, out: &mut String) {
        out.push('(');
        out.push_str(self.kind());
        for child in self.children() {
            if !child.is_named() {
                continue;
            }
            out.push(' ');
            if let Some(field) = child.field_name() {
                out.push_str(field);
                out.push_str(": ");
            }
            child.write_sexp(out);
        }
        out.push(')');
    }
}
