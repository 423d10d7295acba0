//! EditorHost trait: the capabilities the sync core needs from an editor.
//!
//! Implementations:
//! - `MemoryHost` - Headless ropey-backed buffers (console and tests)
//!
//! The host applies edits asynchronously and gives no ordering guarantee if
//! `apply_edit` is called again before the previous call resolves. The edit
//! queue never does that.

use crate::protocol::{Change, PeerId, Selection};
use async_trait::async_trait;
use std::fmt::Debug;
use std::hash::Hash;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Editor not found: {0}")]
    EditorNotFound(String),

    #[error("Edit rejected: {0}")]
    Rejected(String),

    #[error("Failed to open document: {0}")]
    Open(String),
}

pub type Result<T> = std::result::Result<T, HostError>;

/// Severity of a user-visible notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    Info,
    Error,
}

/// One discrete content change inside a text-changed notification.
///
/// Offsets and lengths are UTF-16 code units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChange {
    /// Where the change starts
    pub offset: usize,
    /// Length of the replaced range
    pub removed: usize,
    /// Text inserted at `offset`
    pub text: String,
}

impl ContentChange {
    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self {
            offset,
            removed: 0,
            text: text.into(),
        }
    }

    pub fn delete(offset: usize, removed: usize) -> Self {
        Self {
            offset,
            removed,
            text: String::new(),
        }
    }
}

/// Notifications the host emits about its documents.
///
/// Emitted for user edits and also for edits the core applies itself.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalEvent<D> {
    /// The caret or selection moved.
    SelectionChanged { document: D, selection: Selection },
    /// Text changed; an editor may batch several changes into one event.
    TextChanged {
        document: D,
        changes: Vec<ContentChange>,
    },
}

/// Editor capabilities used by the session.
///
/// `Document` identifies a text document, `Editor` a view onto one.
#[async_trait]
pub trait EditorHost: Send + Sync + 'static {
    type Document: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Editor: Clone + Debug + Send + Sync + 'static;

    /// Document shown by an editor.
    fn document(&self, editor: &Self::Editor) -> Self::Document;

    /// File name used when sharing the document.
    fn document_name(&self, editor: &Self::Editor) -> Result<String>;

    /// Full current text of the editor's document.
    fn text(&self, editor: &Self::Editor) -> Result<String>;

    /// Apply a single change. Resolves once the edit has landed (or failed).
    async fn apply_edit(&self, editor: &Self::Editor, change: &Change) -> Result<()>;

    /// Open a new document pre-populated with `content` and show it.
    async fn open_document(&self, name: &str, content: &str) -> Result<Self::Editor>;

    /// Move our own caret or selection.
    fn set_selection(&self, editor: &Self::Editor, selection: Selection) -> Result<()>;

    /// Draw a peer's cursor or selection as a decoration.
    fn set_peer_decoration(
        &self,
        editor: &Self::Editor,
        peer: &PeerId,
        selection: Selection,
    ) -> Result<()>;

    /// Show a message to the user.
    fn notify(&self, level: NotifyLevel, message: &str);
}
