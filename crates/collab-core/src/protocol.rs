//! Wire protocol messages exchanged with the collaboration backend.
//!
//! Every message is a JSON object with a string `type` discriminator plus
//! type-specific fields. Offsets are UTF-16 code units into the document text.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Backend-assigned identifier for a shared document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DocumentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifier of another participant in a shared document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A single text operation.
///
/// Wire format: `{"type":"insert","index":3,"text":"hi"}` or
/// `{"type":"delete","index":3,"len":2}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Change {
    Insert { index: usize, text: String },
    Delete { index: usize, len: usize },
}

impl Change {
    /// Offset the change starts at.
    pub fn index(&self) -> usize {
        match self {
            Change::Insert { index, .. } | Change::Delete { index, .. } => *index,
        }
    }
}

/// A caret or selection range.
///
/// `point` is the active end, `mark` the anchor. Equal ends mean a collapsed cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub point: usize,
    pub mark: usize,
}

impl Selection {
    pub fn new(point: usize, mark: usize) -> Self {
        Self { point, mark }
    }

    /// A cursor with no extent.
    pub fn collapsed(at: usize) -> Self {
        Self { point: at, mark: at }
    }

    pub fn is_collapsed(&self) -> bool {
        self.point == self.mark
    }

    /// The covered range as `(start, end)` with `start <= end`.
    pub fn range(&self) -> (usize, usize) {
        (self.point.min(self.mark), self.point.max(self.mark))
    }
}

/// Messages sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    CreateDocument {
        name: String,
        initial_content: String,
    },
    JoinDocument {
        id: DocumentId,
    },
    AddPeer {
        address: String,
    },
    Change {
        document_id: DocumentId,
        change: Change,
    },
    SetCursor {
        document_id: DocumentId,
        location: usize,
    },
    SetSelection {
        document_id: DocumentId,
        point: usize,
        mark: usize,
    },
}

impl Outbound {
    /// The wire `type` of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::CreateDocument { .. } => "create_document",
            Outbound::JoinDocument { .. } => "join_document",
            Outbound::AddPeer { .. } => "add_peer",
            Outbound::Change { .. } => "change",
            Outbound::SetCursor { .. } => "set_cursor",
            Outbound::SetSelection { .. } => "set_selection",
        }
    }
}

/// Messages received from the backend.
///
/// Any `type` this client does not know about decodes as [`Inbound::Unknown`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    CreateDocumentResponse {
        id: DocumentId,
    },
    JoinDocumentResponse {
        id: DocumentId,
        current_content: String,
    },
    AddPeerResponse {
        address: String,
    },
    Change {
        document_id: DocumentId,
        change: Change,
    },
    SetCursor {
        document_id: DocumentId,
        location: usize,
        /// Absent when the cursor is our own.
        #[serde(default)]
        peer_id: Option<PeerId>,
    },
    SetSelection {
        document_id: DocumentId,
        selection: Selection,
        #[serde(default)]
        peer_id: Option<PeerId>,
    },
    UnsetMark {
        document_id: DocumentId,
        peer_id: PeerId,
    },
    #[serde(other)]
    Unknown,
}

impl Inbound {
    /// The wire `type` of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::CreateDocumentResponse { .. } => "create_document_response",
            Inbound::JoinDocumentResponse { .. } => "join_document_response",
            Inbound::AddPeerResponse { .. } => "add_peer_response",
            Inbound::Change { .. } => "change",
            Inbound::SetCursor { .. } => "set_cursor",
            Inbound::SetSelection { .. } => "set_selection",
            Inbound::UnsetMark { .. } => "unset_mark",
            Inbound::Unknown => "unknown",
        }
    }
}
