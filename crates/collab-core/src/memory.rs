//! MemoryHost: a headless editor host backed by in-memory text buffers.
//!
//! Each opened document gets exactly one editor, so both are addressed by the
//! same [`EditorId`]. Like a real editor, every content change (whether typed
//! by the user or applied by the sync core) is reported to subscribers as a
//! [`LocalEvent`], and remote applies report their change *before* resolving.

use crate::buffer::{Position, TextBuffer};
use crate::host::{ContentChange, EditorHost, HostError, LocalEvent, NotifyLevel, Result};
use crate::protocol::{Change, PeerId, Selection};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Handle for a document and its single editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EditorId(u64);

impl EditorId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for EditorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EditorId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// A notification shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotifyLevel,
    pub message: String,
}

struct MemoryDocument {
    name: String,
    buffer: TextBuffer,
    selection: Selection,
    decorations: HashMap<PeerId, Selection>,
}

/// In-memory editor host.
pub struct MemoryHost {
    documents: RwLock<BTreeMap<EditorId, MemoryDocument>>,
    next_id: AtomicU64,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<LocalEvent<EditorId>>>>,
    notifications: Mutex<Vec<Notification>>,
    /// When set, `apply_edit` fails without touching the buffer
    reject_edits: AtomicBool,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            reject_edits: AtomicBool::new(false),
        }
    }

    /// Receive every local event emitted from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<LocalEvent<EditorId>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    fn emit(&self, event: LocalEvent<EditorId>) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        // Drop subscribers whose receiver is gone
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Open a local (not yet shared) document.
    pub fn open(&self, name: &str, text: &str) -> EditorId {
        let id = EditorId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.documents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                id,
                MemoryDocument {
                    name: name.to_string(),
                    buffer: TextBuffer::new(text),
                    selection: Selection::collapsed(0),
                    decorations: HashMap::new(),
                },
            );
        debug!("Opened editor {} ({})", id, name);
        id
    }

    /// A user edit: replace `removed` units at `offset` with `text`.
    pub fn edit(&self, editor: EditorId, offset: usize, removed: usize, text: &str) -> Result<()> {
        self.modify(editor, offset, removed, text)?;
        self.emit(LocalEvent::TextChanged {
            document: editor,
            changes: vec![ContentChange {
                offset,
                removed,
                text: text.to_string(),
            }],
        });
        Ok(())
    }

    /// A user caret/selection move.
    pub fn select(&self, editor: EditorId, selection: Selection) -> Result<()> {
        self.with_document(editor, |doc| doc.selection = selection)?;
        self.emit(LocalEvent::SelectionChanged {
            document: editor,
            selection,
        });
        Ok(())
    }

    fn modify(&self, editor: EditorId, offset: usize, removed: usize, text: &str) -> Result<()> {
        let mut documents = self.documents.write().unwrap_or_else(|e| e.into_inner());
        let doc = documents
            .get_mut(&editor)
            .ok_or_else(|| HostError::EditorNotFound(editor.to_string()))?;

        // Validate the whole replacement before touching the buffer
        let len = doc.buffer.len_utf16();
        if offset.saturating_add(removed) > len {
            return Err(HostError::Rejected(format!(
                "range {}..{} out of bounds for length {}",
                offset,
                offset.saturating_add(removed),
                len
            )));
        }
        if removed > 0 {
            doc.buffer
                .delete(offset, removed)
                .map_err(|e| HostError::Rejected(e.to_string()))?;
        }
        if !text.is_empty() {
            doc.buffer
                .insert(offset, text)
                .map_err(|e| HostError::Rejected(e.to_string()))?;
        }
        Ok(())
    }

    fn with_document<T>(
        &self,
        editor: EditorId,
        f: impl FnOnce(&mut MemoryDocument) -> T,
    ) -> Result<T> {
        let mut documents = self.documents.write().unwrap_or_else(|e| e.into_inner());
        documents
            .get_mut(&editor)
            .map(f)
            .ok_or_else(|| HostError::EditorNotFound(editor.to_string()))
    }

    fn read_document<T>(
        &self,
        editor: EditorId,
        f: impl FnOnce(&MemoryDocument) -> T,
    ) -> Result<T> {
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        documents
            .get(&editor)
            .map(f)
            .ok_or_else(|| HostError::EditorNotFound(editor.to_string()))
    }

    /// Our own caret/selection in an editor.
    pub fn selection(&self, editor: EditorId) -> Option<Selection> {
        self.read_document(editor, |doc| doc.selection).ok()
    }

    /// A peer's decoration in an editor.
    pub fn decoration(&self, editor: EditorId, peer: &PeerId) -> Option<Selection> {
        self.read_document(editor, |doc| doc.decorations.get(peer).copied())
            .ok()
            .flatten()
    }

    /// Convert an offset to a line/character position.
    pub fn position_at(&self, editor: EditorId, offset: usize) -> Option<Position> {
        self.read_document(editor, |doc| doc.buffer.position_at(offset)).ok()
    }

    /// Convert a line/character position to an offset.
    pub fn offset_at(&self, editor: EditorId, position: Position) -> Option<usize> {
        self.read_document(editor, |doc| doc.buffer.offset_at(position)).ok()
    }

    /// All open editors with their document names, in opening order.
    pub fn editors(&self) -> Vec<(EditorId, String)> {
        self.documents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, doc)| (*id, doc.name.clone()))
            .collect()
    }

    /// Notifications shown so far.
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Make subsequent `apply_edit` calls fail (simulates an editor refusing an edit).
    pub fn set_reject_edits(&self, reject: bool) {
        self.reject_edits.store(reject, Ordering::Relaxed);
    }
}

#[async_trait]
impl EditorHost for MemoryHost {
    type Document = EditorId;
    type Editor = EditorId;

    fn document(&self, editor: &EditorId) -> EditorId {
        *editor
    }

    fn document_name(&self, editor: &EditorId) -> Result<String> {
        self.read_document(*editor, |doc| doc.name.clone())
    }

    fn text(&self, editor: &EditorId) -> Result<String> {
        self.read_document(*editor, |doc| doc.buffer.text())
    }

    async fn apply_edit(&self, editor: &EditorId, change: &Change) -> Result<()> {
        if self.reject_edits.load(Ordering::Relaxed) {
            return Err(HostError::Rejected("editor refused the edit".into()));
        }

        let content_change = match change {
            Change::Insert { index, text } => ContentChange::insert(*index, text.clone()),
            Change::Delete { index, len } => ContentChange::delete(*index, *len),
        };
        self.modify(
            *editor,
            content_change.offset,
            content_change.removed,
            &content_change.text,
        )?;
        self.emit(LocalEvent::TextChanged {
            document: *editor,
            changes: vec![content_change],
        });

        // The edit lands before the returned future resolves, as in a real editor
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn open_document(&self, name: &str, content: &str) -> Result<EditorId> {
        let id = self.open(name, content);
        tokio::task::yield_now().await;
        Ok(id)
    }

    fn set_selection(&self, editor: &EditorId, selection: Selection) -> Result<()> {
        // Programmatic moves are not reported back as local events
        self.with_document(*editor, |doc| doc.selection = selection)
    }

    fn set_peer_decoration(
        &self,
        editor: &EditorId,
        peer: &PeerId,
        selection: Selection,
    ) -> Result<()> {
        self.with_document(*editor, |doc| {
            doc.decorations.insert(peer.clone(), selection);
        })
    }

    fn notify(&self, level: NotifyLevel, message: &str) {
        match level {
            NotifyLevel::Info => info!("{}", message),
            NotifyLevel::Error => error!("{}", message),
        }
        self.notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Notification {
                level,
                message: message.to_string(),
            });
    }
}
