//! Identity registry: which local documents are shared, under which ID.
//!
//! Maps local document handles to backend document IDs, document IDs to the
//! editor currently showing them, and remembers every peer's last known
//! cursor or selection per document.

use crate::protocol::{DocumentId, PeerId, Selection};
use std::collections::HashMap;
use std::hash::Hash;

/// Bidirectional document/ID bindings plus per-peer mark positions.
///
/// Bindings are last-write-wins in both directions; nothing prevents two IDs
/// pointing at editors over the same underlying document.
#[derive(Debug)]
pub struct Registry<D, E> {
    document_to_id: HashMap<D, DocumentId>,
    id_to_editor: HashMap<DocumentId, E>,
    peer_marks: HashMap<DocumentId, HashMap<PeerId, Selection>>,
}

impl<D, E> Default for Registry<D, E> {
    fn default() -> Self {
        Self {
            document_to_id: HashMap::new(),
            id_to_editor: HashMap::new(),
            peer_marks: HashMap::new(),
        }
    }
}

impl<D: Eq + Hash, E> Registry<D, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a document and its editor to a backend ID, replacing any previous
    /// association of either.
    pub fn bind(&mut self, document: D, editor: E, id: DocumentId) {
        self.document_to_id.insert(document, id.clone());
        self.id_to_editor.insert(id, editor);
    }

    /// Backend ID of a local document, if it is shared.
    pub fn resolve_id(&self, document: &D) -> Option<&DocumentId> {
        self.document_to_id.get(document)
    }

    /// Editor currently bound to a backend ID.
    pub fn resolve_editor(&self, id: &DocumentId) -> Option<&E> {
        self.id_to_editor.get(id)
    }

    /// Record a peer's latest cursor or selection in a document.
    pub fn set_peer_cursor(&mut self, id: DocumentId, peer: PeerId, selection: Selection) {
        self.peer_marks.entry(id).or_default().insert(peer, selection);
    }

    /// A peer's last known cursor or selection in a document.
    pub fn peer_cursor(&self, id: &DocumentId, peer: &PeerId) -> Option<Selection> {
        self.peer_marks.get(id)?.get(peer).copied()
    }

    /// Drop a peer's mark, leaving its cursor collapsed at the last point.
    ///
    /// Returns the collapsed position, or `None` if the peer was never seen.
    pub fn collapse_peer_mark(&mut self, id: &DocumentId, peer: &PeerId) -> Option<Selection> {
        let selection = self.peer_marks.get_mut(id)?.get_mut(peer)?;
        *selection = Selection::collapsed(selection.point);
        Some(*selection)
    }

    /// Number of shared documents.
    pub fn len(&self) -> usize {
        self.id_to_editor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_editor.is_empty()
    }
}
