//! collab-core: editor-side synchronization core for collaborative editing.
//!
//! This crate provides the core functionality for:
//! - Encoding and decoding the newline-delimited JSON backend protocol
//! - Mapping local documents and editors to backend document IDs
//! - Translating local edits into protocol messages without echoing remote ones
//! - Applying remote edits to local buffers strictly in order
//! - The EditorHost trait abstraction, with an in-memory implementation

pub mod actor;
pub mod buffer;
pub mod codec;
pub mod host;
pub mod memory;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod session;
pub mod translator;

pub use actor::{Command, SessionInput};
pub use buffer::{Position, TextBuffer};
pub use codec::{CodecError, DecodeError, Decoded, LineDecoder};
pub use host::{ContentChange, EditorHost, HostError, LocalEvent, NotifyLevel};
pub use memory::{EditorId, MemoryHost, Notification};
pub use protocol::{Change, DocumentId, Inbound, Outbound, PeerId, Selection};
pub use queue::{ApplyOutcome, EditQueue, QueueState};
pub use registry::Registry;
pub use session::{Session, SessionError};
