use super::snippet::Snippet;
use serde::{Deserialize, Serialize};

/// A single tagged edit within an [`Op`]. Exactly one payload variant is
/// populated; `NoOp` carries only a position and serves as a version
/// carrier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Component {
    Insertion { position: usize, snippet: Snippet },
    Deletion { position: usize, snippet: Snippet },
    Comment {
        position: usize,
        snippet: Snippet,
        thread_id: String,
    },
    NoOp { position: usize },
}

impl Component {
    pub fn position(&self) -> usize {
        match self {
            Component::Insertion { position, .. }
            | Component::Deletion { position, .. }
            | Component::Comment { position, .. }
            | Component::NoOp { position } => *position,
        }
    }

    pub fn set_position(&mut self, new_position: usize) {
        match self {
            Component::Insertion { position, .. }
            | Component::Deletion { position, .. }
            | Component::Comment { position, .. }
            | Component::NoOp { position } => *position = new_position,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Component::Insertion { snippet, .. }
            | Component::Deletion { snippet, .. }
            | Component::Comment { snippet, .. } => snippet.len(),
            Component::NoOp { .. } => 0,
        }
    }

    pub fn is_insertion(&self) -> bool {
        matches!(self, Component::Insertion { .. })
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self, Component::Deletion { .. })
    }

    pub fn is_comment(&self) -> bool {
        matches!(self, Component::Comment { .. })
    }
}

/// An ordered, possibly empty list of components representing one atomic
/// client edit.
pub type Op = Vec<Component>;
