//! Session: all synchronization state for one backend connection.
//!
//! Owns the identity registry, the edit queue and the pending creation, and
//! dispatches every inbound message to the matching state transition. A
//! message that references something unknown fails on its own (logged) and
//! leaves all other state untouched.

use crate::codec::Decoded;
use crate::host::{EditorHost, HostError, LocalEvent, NotifyLevel};
use crate::protocol::{DocumentId, Inbound, Outbound, PeerId, Selection};
use crate::queue::{ApplyOutcome, EditQueue};
use crate::registry::Registry;
use crate::translator;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No editor bound to document {0}")]
    UnknownDocument(DocumentId),

    #[error("No known mark for peer {peer} in document {document}")]
    UnknownPeer { document: DocumentId, peer: PeerId },

    #[error("No document was being created when response was received")]
    NoPendingCreation,

    #[error("Backend process is not active")]
    NotConnected,

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Synchronization state for one backend connection.
pub struct Session<H: EditorHost> {
    host: Arc<H>,
    registry: Registry<H::Document, H::Editor>,
    queue: EditQueue,
    /// Editor whose `create_document` request is awaiting its response
    pending_creation: Option<H::Editor>,
    /// Outbound channel to the backend (None = backend inactive)
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
}

impl<H: EditorHost> Session<H> {
    pub fn new(host: Arc<H>) -> Self {
        Self {
            host,
            registry: Registry::new(),
            queue: EditQueue::new(),
            pending_creation: None,
            outbound: None,
        }
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn registry(&self) -> &Registry<H::Document, H::Editor> {
        &self.registry
    }

    pub fn queue(&self) -> &EditQueue {
        &self.queue
    }

    pub fn pending_creation(&self) -> Option<&H::Editor> {
        self.pending_creation.as_ref()
    }

    /// Route outbound messages to a newly started backend.
    pub fn attach(&mut self, outbound: mpsc::UnboundedSender<Outbound>) {
        self.outbound = Some(outbound);
    }

    /// Forget the backend; later sends fail fast.
    pub fn detach(&mut self) {
        self.outbound = None;
    }

    pub fn is_attached(&self) -> bool {
        self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Fail with a user-visible error unless a backend is attached.
    fn ensure_attached(&self) -> Result<()> {
        if self.is_attached() {
            Ok(())
        } else {
            self.host
                .notify(NotifyLevel::Error, "Backend process is not active.");
            Err(SessionError::NotConnected)
        }
    }

    /// Send a message to the backend.
    pub fn send(&mut self, message: Outbound) -> Result<()> {
        self.ensure_attached()?;
        let kind = message.kind();
        let sent = self
            .outbound
            .as_ref()
            .map(|tx| tx.send(message).is_ok())
            .unwrap_or(false);
        if sent {
            debug!("Sent {} message", kind);
            Ok(())
        } else {
            self.outbound = None;
            self.host
                .notify(NotifyLevel::Error, "Backend process is not active.");
            Err(SessionError::NotConnected)
        }
    }

    // ==================== Inbound ====================

    /// Handle one decoded line from the backend.
    pub async fn handle_line(&mut self, line: Decoded) {
        match line {
            Ok(value) => self.handle_value(value).await,
            Err(e) => {
                warn!("{}\nMessage: {}", e, e.raw);
                self.host
                    .notify(NotifyLevel::Error, "Failed to parse backend message!");
            }
        }
    }

    /// Interpret a parsed JSON object and dispatch it.
    pub async fn handle_value(&mut self, value: Value) {
        match Inbound::deserialize(&value) {
            Ok(Inbound::Unknown) => warn!("Unknown message: {}", value),
            Ok(message) => self.dispatch(message).await,
            Err(e) => warn!("Malformed message ({}): {}", e, value),
        }
    }

    /// Perform the state transition for one inbound message.
    pub async fn dispatch(&mut self, message: Inbound) {
        let kind = message.kind();
        debug!("Dispatching {} message", kind);
        let result = match message {
            Inbound::CreateDocumentResponse { id } => self.on_document_created(id),
            Inbound::AddPeerResponse { address } => {
                self.host.notify(
                    NotifyLevel::Info,
                    &format!("Successfully added peer at {}", address),
                );
                Ok(())
            }
            Inbound::JoinDocumentResponse {
                id,
                current_content,
            } => self.on_document_joined(id, current_content).await,
            Inbound::Change {
                document_id,
                change,
            } => {
                self.queue.enqueue(document_id, change);
                self.queue.drain(&self.host, &self.registry);
                Ok(())
            }
            Inbound::SetCursor {
                document_id,
                location,
                peer_id,
            } => self.on_mark(document_id, Selection::collapsed(location), peer_id),
            Inbound::SetSelection {
                document_id,
                selection,
                peer_id,
            } => self.on_mark(document_id, selection, peer_id),
            Inbound::UnsetMark {
                document_id,
                peer_id,
            } => self.on_unset_mark(document_id, peer_id),
            Inbound::Unknown => {
                warn!("Unknown message");
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("Dropped {} message: {}", kind, e);
        }
    }

    fn on_document_created(&mut self, id: DocumentId) -> Result<()> {
        let editor = self
            .pending_creation
            .take()
            .ok_or(SessionError::NoPendingCreation)?;
        let document = self.host.document(&editor);
        self.registry.bind(document, editor, id.clone());
        self.host
            .notify(NotifyLevel::Info, &format!("Document created with ID {}.", id));
        Ok(())
    }

    async fn on_document_joined(&mut self, id: DocumentId, content: String) -> Result<()> {
        info!("Joined document with ID {} ({} bytes)", id, content.len());
        let editor = self.host.open_document(id.as_str(), &content).await?;
        let document = self.host.document(&editor);
        self.registry.bind(document, editor, id.clone());
        self.host
            .notify(NotifyLevel::Info, &format!("Joined document with ID {}.", id));
        Ok(())
    }

    /// Our own echoed cursor/selection, or a peer's mark to decorate.
    fn on_mark(
        &mut self,
        document_id: DocumentId,
        selection: Selection,
        peer_id: Option<PeerId>,
    ) -> Result<()> {
        let editor = self
            .registry
            .resolve_editor(&document_id)
            .ok_or_else(|| SessionError::UnknownDocument(document_id.clone()))?;

        match peer_id {
            None => self.host.set_selection(editor, selection)?,
            Some(peer) => {
                self.host.set_peer_decoration(editor, &peer, selection)?;
                self.registry.set_peer_cursor(document_id, peer, selection);
            }
        }
        Ok(())
    }

    /// Collapse a peer's decoration at its last recorded point.
    fn on_unset_mark(&mut self, document_id: DocumentId, peer: PeerId) -> Result<()> {
        let editor = self
            .registry
            .resolve_editor(&document_id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownDocument(document_id.clone()))?;
        let collapsed = self
            .registry
            .collapse_peer_mark(&document_id, &peer)
            .ok_or_else(|| SessionError::UnknownPeer {
                document: document_id.clone(),
                peer: peer.clone(),
            })?;
        self.host.set_peer_decoration(&editor, &peer, collapsed)?;
        Ok(())
    }

    // ==================== Edit queue ====================

    /// Wait for the in-flight remote edit to resolve. Never resolves while idle.
    pub async fn applied(&mut self) -> ApplyOutcome {
        self.queue.applied().await
    }

    /// Record a resolved remote edit and start the next one.
    pub fn on_applied(&mut self, outcome: ApplyOutcome) {
        self.queue.complete(&outcome);
        self.queue.drain(&self.host, &self.registry);
    }

    // ==================== Outbound ====================

    /// Translate a local editor event and send the resulting messages.
    pub fn handle_local(&mut self, event: LocalEvent<H::Document>) {
        let messages = translator::translate(&event, &self.registry, self.queue.is_suppressing());
        for message in messages {
            if self.send(message).is_err() {
                break;
            }
        }
    }

    /// Share an editor's document: remember it as pending and ask the backend
    /// to create it.
    pub fn create_document(&mut self, editor: H::Editor) -> Result<()> {
        self.ensure_attached()?;
        let name = self.host.document_name(&editor)?;
        let initial_content = self.host.text(&editor)?;

        if self.pending_creation.is_some() {
            warn!("Replacing pending document creation");
        }
        self.pending_creation = Some(editor);

        let sent = self.send(Outbound::CreateDocument {
            name,
            initial_content,
        });
        if sent.is_err() {
            self.pending_creation = None;
        }
        sent
    }

    /// Ask the backend to join an existing document.
    pub fn join_document(&mut self, id: &str) -> Result<()> {
        self.ensure_attached()?;
        let id = id.trim();
        if id.is_empty() {
            self.host
                .notify(NotifyLevel::Info, "No document ID provided.");
            return Ok(());
        }
        self.send(Outbound::JoinDocument { id: id.into() })?;
        self.host.notify(
            NotifyLevel::Info,
            &format!("Joining document with ID {}…", id),
        );
        Ok(())
    }

    /// Ask the backend to connect to a peer.
    pub fn add_peer(&mut self, address: &str) -> Result<()> {
        self.ensure_attached()?;
        let address = address.trim();
        if address.is_empty() {
            self.host
                .notify(NotifyLevel::Info, "No peer address provided.");
            return Ok(());
        }
        self.send(Outbound::AddPeer {
            address: address.to_string(),
        })?;
        self.host.notify(
            NotifyLevel::Info,
            &format!("Connecting to peer at {}…", address),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_chunk;
    use crate::memory::{EditorId, MemoryHost};
    use crate::protocol::Change;
    use crate::queue::QueueState;
    use serde_json::json;

    struct Harness {
        host: Arc<MemoryHost>,
        session: Session<MemoryHost>,
        sent: mpsc::UnboundedReceiver<Outbound>,
        events: mpsc::UnboundedReceiver<LocalEvent<EditorId>>,
    }

    impl Harness {
        fn new() -> Self {
            let host = Arc::new(MemoryHost::new());
            let events = host.subscribe();
            let mut session = Session::new(Arc::clone(&host));
            let (tx, sent) = mpsc::unbounded_channel();
            session.attach(tx);
            Self {
                host,
                session,
                sent,
                events,
            }
        }

        /// Share a fresh editor under `id` through the create flow.
        async fn shared_editor(&mut self, id: &str, text: &str) -> EditorId {
            let editor = self.host.open("notes.md", text);
            self.session.create_document(editor).unwrap();
            self.session
                .handle_value(json!({"type": "create_document_response", "id": id}))
                .await;
            self.drain_sent();
            editor
        }

        /// Run the queue to completion, feeding host events back in between
        /// the way the actor does.
        async fn settle(&mut self) {
            loop {
                self.pump_events();
                if self.session.queue().state() == QueueState::Idle {
                    break;
                }
                let outcome = self.session.applied().await;
                self.pump_events();
                self.session.on_applied(outcome);
            }
        }

        fn pump_events(&mut self) {
            while let Ok(event) = self.events.try_recv() {
                self.session.handle_local(event);
            }
        }

        fn drain_sent(&mut self) -> Vec<Outbound> {
            let mut sent = Vec::new();
            while let Ok(message) = self.sent.try_recv() {
                sent.push(message);
            }
            sent
        }
    }

    #[tokio::test]
    async fn test_create_document_flow() {
        let mut h = Harness::new();
        let editor = h.host.open("notes.md", "hello");

        h.session.create_document(editor).unwrap();
        assert_eq!(h.session.pending_creation(), Some(&editor));
        assert_eq!(
            h.drain_sent(),
            vec![Outbound::CreateDocument {
                name: "notes.md".into(),
                initial_content: "hello".into(),
            }]
        );

        h.session
            .handle_value(json!({"type": "create_document_response", "id": "doc-1"}))
            .await;
        assert!(h.session.pending_creation().is_none());
        assert_eq!(
            h.session.registry().resolve_id(&editor),
            Some(&DocumentId::from("doc-1"))
        );
        assert_eq!(
            h.session.registry().resolve_editor(&"doc-1".into()),
            Some(&editor)
        );
    }

    #[tokio::test]
    async fn test_creation_response_without_pending_is_discarded() {
        let mut h = Harness::new();
        let editor = h.shared_editor("doc-1", "").await;

        h.session
            .handle_value(json!({"type": "create_document_response", "id": "doc-2"}))
            .await;

        assert_eq!(h.session.registry().len(), 1);
        assert_eq!(
            h.session.registry().resolve_id(&editor),
            Some(&DocumentId::from("doc-1"))
        );
        assert!(h.session.registry().resolve_editor(&"doc-2".into()).is_none());
        assert!(h.session.pending_creation().is_none());
    }

    #[tokio::test]
    async fn test_join_opens_and_binds_document() {
        let mut h = Harness::new();
        h.session
            .handle_value(json!({
                "type": "join_document_response",
                "id": "doc-9",
                "current_content": "shared"
            }))
            .await;

        let editor = *h
            .session
            .registry()
            .resolve_editor(&"doc-9".into())
            .unwrap();
        assert_eq!(h.host.text(&editor).unwrap(), "shared");
        assert_eq!(h.host.document_name(&editor).unwrap(), "doc-9");

        // Populating the joined document is not reported as a user edit
        h.pump_events();
        assert!(h.drain_sent().is_empty());
    }

    #[tokio::test]
    async fn test_remote_burst_applies_in_order() {
        let mut h = Harness::new();
        let editor = h.shared_editor("doc-1", "").await;

        for change in [
            json!({"type": "insert", "index": 0, "text": "a"}),
            json!({"type": "insert", "index": 1, "text": "b"}),
            json!({"type": "delete", "index": 0, "len": 1}),
        ] {
            h.session
                .handle_value(json!({"type": "change", "document_id": "doc-1", "change": change}))
                .await;
        }
        h.settle().await;

        assert_eq!(h.host.text(&editor).unwrap(), "b");
        assert!(!h.session.queue().is_suppressing());
    }

    #[tokio::test]
    async fn test_remote_change_is_not_echoed() {
        let mut h = Harness::new();
        let editor = h.shared_editor("doc-1", "").await;

        h.session
            .dispatch(Inbound::Change {
                document_id: "doc-1".into(),
                change: Change::Insert {
                    index: 0,
                    text: "x".into(),
                },
            })
            .await;
        h.settle().await;

        assert_eq!(h.host.text(&editor).unwrap(), "x");
        let echoed: Vec<_> = h
            .drain_sent()
            .into_iter()
            .filter(|m| matches!(m, Outbound::Change { .. }))
            .collect();
        assert!(echoed.is_empty(), "remote edit echoed: {:?}", echoed);
    }

    #[tokio::test]
    async fn test_user_edit_after_burst_is_sent() {
        let mut h = Harness::new();
        let editor = h.shared_editor("doc-1", "").await;

        h.session
            .dispatch(Inbound::Change {
                document_id: "doc-1".into(),
                change: Change::Insert {
                    index: 0,
                    text: "x".into(),
                },
            })
            .await;
        h.settle().await;

        h.host.edit(editor, 1, 0, "y").unwrap();
        h.pump_events();
        assert_eq!(
            h.drain_sent(),
            vec![Outbound::Change {
                document_id: "doc-1".into(),
                change: Change::Insert {
                    index: 1,
                    text: "y".into()
                },
            }]
        );
    }

    #[tokio::test]
    async fn test_local_edits_translate() {
        let mut h = Harness::new();
        let editor = h.shared_editor("doc-1", "hello").await;

        h.host.edit(editor, 0, 1, "").unwrap();
        h.host.edit(editor, 0, 1, "J").unwrap();
        h.host.select(editor, Selection::new(3, 1)).unwrap();
        h.pump_events();

        assert_eq!(
            h.drain_sent(),
            vec![
                Outbound::Change {
                    document_id: "doc-1".into(),
                    change: Change::Delete { index: 0, len: 1 },
                },
                // The replace has no wire form and is dropped
                Outbound::SetSelection {
                    document_id: "doc-1".into(),
                    point: 3,
                    mark: 1,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_parse_failure_is_isolated() {
        let mut h = Harness::new();
        h.shared_editor("doc-1", "").await;

        let chunk = concat!(
            "{\"type\":\"add_peer_response\",\"address\":\"a\"}\n",
            "{oops\n",
            "{\"type\":\"add_peer_response\",\"address\":\"b\"}\n",
        )
        .as_bytes();
        for line in decode_chunk(chunk) {
            h.session.handle_line(line).await;
        }

        let messages: Vec<String> = h
            .host
            .notifications()
            .into_iter()
            .map(|n| n.message)
            .filter(|m| {
                m.starts_with("Successfully added peer") || m.starts_with("Failed to parse")
            })
            .collect();
        assert_eq!(
            messages,
            vec![
                "Successfully added peer at a".to_string(),
                "Failed to parse backend message!".to_string(),
                "Successfully added peer at b".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_own_cursor_moves_local_selection() {
        let mut h = Harness::new();
        let editor = h.shared_editor("doc-1", "hello world").await;

        h.session
            .handle_value(json!({"type": "set_cursor", "document_id": "doc-1", "location": 4}))
            .await;
        assert_eq!(h.host.selection(editor), Some(Selection::collapsed(4)));

        h.session
            .handle_value(json!({
                "type": "set_selection",
                "document_id": "doc-1",
                "selection": {"point": 8, "mark": 2}
            }))
            .await;
        assert_eq!(h.host.selection(editor), Some(Selection::new(8, 2)));
        assert!(h.session.registry().peer_cursor(&"doc-1".into(), &"p1".into()).is_none());
    }

    #[tokio::test]
    async fn test_peer_cursor_then_unset_mark() {
        let mut h = Harness::new();
        let editor = h.shared_editor("doc-1", "hello world").await;
        let peer = PeerId::from("p1");

        h.session
            .handle_value(json!({
                "type": "set_cursor",
                "document_id": "doc-1",
                "location": 5,
                "peer_id": "p1"
            }))
            .await;
        assert_eq!(h.host.decoration(editor, &peer), Some(Selection::collapsed(5)));

        h.session
            .handle_value(json!({"type": "unset_mark", "document_id": "doc-1", "peer_id": "p1"}))
            .await;
        assert_eq!(h.host.decoration(editor, &peer), Some(Selection::collapsed(5)));
        assert_eq!(
            h.session.registry().peer_cursor(&"doc-1".into(), &peer),
            Some(Selection::collapsed(5))
        );
        // Our own caret is untouched by peer marks
        assert_eq!(h.host.selection(editor), Some(Selection::collapsed(0)));
    }

    #[tokio::test]
    async fn test_unset_mark_collapses_peer_selection() {
        let mut h = Harness::new();
        let editor = h.shared_editor("doc-1", "hello world").await;
        let peer = PeerId::from("p2");

        h.session
            .dispatch(Inbound::SetSelection {
                document_id: "doc-1".into(),
                selection: Selection::new(9, 3),
                peer_id: Some(peer.clone()),
            })
            .await;
        assert_eq!(h.host.decoration(editor, &peer), Some(Selection::new(9, 3)));

        h.session
            .dispatch(Inbound::UnsetMark {
                document_id: "doc-1".into(),
                peer_id: peer.clone(),
            })
            .await;
        assert_eq!(h.host.decoration(editor, &peer), Some(Selection::collapsed(9)));
    }

    #[tokio::test]
    async fn test_unknown_document_leaves_state_untouched() {
        let mut h = Harness::new();
        let editor = h.shared_editor("doc-1", "abc").await;

        h.session
            .handle_value(json!({
                "type": "set_cursor",
                "document_id": "nope",
                "location": 1,
                "peer_id": "p1"
            }))
            .await;
        h.session
            .handle_value(json!({"type": "unset_mark", "document_id": "doc-1", "peer_id": "ghost"}))
            .await;
        h.session.handle_value(json!({"type": "mystery"})).await;
        h.session
            .handle_value(json!({"type": "change", "document_id": "doc-1"}))
            .await;

        assert!(h.session.registry().peer_cursor(&"nope".into(), &"p1".into()).is_none());
        assert_eq!(h.host.decoration(editor, &"ghost".into()), None);
        assert_eq!(h.host.text(&editor).unwrap(), "abc");
        assert_eq!(h.session.queue().len(), 0);
    }

    #[tokio::test]
    async fn test_sends_fail_fast_when_detached() {
        let mut h = Harness::new();
        let editor = h.host.open("notes.md", "x");
        h.session.detach();

        assert!(matches!(
            h.session.create_document(editor),
            Err(SessionError::NotConnected)
        ));
        assert!(h.session.pending_creation().is_none());
        assert!(matches!(
            h.session.add_peer("10.0.0.1:6969"),
            Err(SessionError::NotConnected)
        ));
        assert!(
            h.host
                .notifications()
                .iter()
                .any(|n| n.message == "Backend process is not active.")
        );
    }

    #[tokio::test]
    async fn test_sends_fail_when_backend_gone() {
        let mut h = Harness::new();
        h.sent.close();

        assert!(!h.session.is_attached());
        assert!(matches!(
            h.session.join_document("doc-1"),
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_join_and_add_peer_messages() {
        let mut h = Harness::new();
        h.session.join_document(" doc-7 ").unwrap();
        h.session.add_peer("192.168.1.1:8080").unwrap();
        h.session.add_peer("").unwrap();

        assert_eq!(
            h.drain_sent(),
            vec![
                Outbound::JoinDocument { id: "doc-7".into() },
                Outbound::AddPeer {
                    address: "192.168.1.1:8080".into()
                },
            ]
        );
        assert!(
            h.host
                .notifications()
                .iter()
                .any(|n| n.message == "No peer address provided.")
        );
    }

    #[tokio::test]
    async fn test_unrelated_local_event_during_burst() {
        let mut h = Harness::new();
        let shared = h.shared_editor("doc-1", "").await;
        let other = h.shared_editor("doc-2", "").await;

        h.session
            .dispatch(Inbound::Change {
                document_id: "doc-1".into(),
                change: Change::Insert {
                    index: 0,
                    text: "r".into(),
                },
            })
            .await;
        // A selection move while the burst drains is still reported
        h.host.select(other, Selection::collapsed(0)).unwrap();
        h.settle().await;

        assert_eq!(h.host.text(&shared).unwrap(), "r");
        assert_eq!(
            h.drain_sent(),
            vec![Outbound::SetCursor {
                document_id: "doc-2".into(),
                location: 0,
            }]
        );
    }
}
