use super::Node;

/// Walks the visible nodes of a tree.
///
/// Moves mirror tree-sitter's cursor: each returns `false` and leaves the
/// cursor in place when there is nowhere to go.
#[derive(Debug, Clone)]
pub struct TreeCursor<'t> {
    root: Node<'t>,
    /// Sibling lists from the root's children down to the current node.
    frames: Vec<(Vec<Node<'t>>, usize)>,
}

impl<'t> TreeCursor<'t> {
    pub(crate) fn new(root: Node<'t>) -> Self {
        Self {
            root,
            frames: Vec::new(),
        }
    }

    /// The current node.
    #[must_use]
    pub fn node(&self) -> Node<'t> {
        self.frames
            .last()
            .map_or(self.root, |(siblings, index)| siblings[*index])
    }

    /// The field of the current node within its parent.
    #[must_use]
    pub fn field_name(&self) -> Option<&'t str> {
        self.node().field_name()
    }

    /// Moves to the first visible child.
    pub fn goto_first_child(&mut self) -> bool {
        let children = self.node().children();
        if children.is_empty() {
            return false;
        }
        self.frames.push((children, 0));
        true
    }

    /// Moves to the next visible sibling.
    pub fn goto_next_sibling(&mut self) -> bool {
        match self.frames.last_mut() {
            Some((siblings, index)) if *index + 1 < siblings.len() => {
                *index += 1;
                true
            }
            _ => false,
        }
    }

    /// Moves to the parent.
    pub fn goto_parent(&mut self) -> bool {
        self.frames.pop().is_some()
    }

    /// Distance from the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}
