use crate::table::StateId;
use crate::tree::NodeId;

/// One node on the parse stack with the state reached after pushing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Entry {
    pub state: StateId,
    pub node: NodeId,
    /// Absolute byte offset of the node in the new text.
    pub start: usize,
    /// Extras do not change the state; they take the state below them.
    pub extra: bool,
}

/// The LR stack. The initial state 0 sits below the first entry.
#[derive(Debug, Default)]
pub(crate) struct Stack {
    entries: Vec<Entry>,
}

impl Stack {
    pub fn top_state(&self) -> StateId {
        self.entries.last().map_or(0, |entry| entry.state)
    }

    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn pop(&mut self) -> Option<Entry> {
        self.entries.pop()
    }

    pub fn last(&self) -> Option<&Entry> {
        self.entries.last()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Removes and returns the entries from `at` up.
    pub fn split_off(&mut self, at: usize) -> Vec<Entry> {
        self.entries.split_off(at.min(self.entries.len()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The states a reduction would see: the initial state, then the state
    /// of every non-extra entry of `entries`.
    pub fn states_of(entries: &[Entry]) -> Vec<StateId> {
        std::iter::once(0)
            .chain(entries.iter().filter(|e| !e.extra).map(|e| e.state))
            .collect()
    }
}
