//! Session actor: serializes everything that touches a session.
//!
//! Backend lines, connection changes, user commands, local editor events and
//! apply completions all arrive on one task, so handlers never interleave.
//! Local events are polled first. When an apply resolves, any events the host
//! emitted during it are handled before the queue moves on, so they are
//! classified while suppression is still set.

use crate::codec::Decoded;
use crate::host::{EditorHost, LocalEvent, NotifyLevel};
use crate::protocol::Outbound;
use crate::session::Session;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A user-initiated command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command<E> {
    /// Share the document shown in this editor
    CreateDocument(E),
    /// Join a document by its ID
    JoinDocument(String),
    /// Connect the backend to a peer address
    AddPeer(String),
}

/// Everything besides local editor events that drives a session.
#[derive(Debug)]
pub enum SessionInput<E> {
    /// One decoded line of backend stdout
    Line(Decoded),
    /// Backend started; outbound messages go to this channel
    Connected(mpsc::UnboundedSender<Outbound>),
    /// Backend exited with this code (None if killed by a signal)
    Disconnected(Option<i32>),
    /// Informational message for the user
    Notice(String),
    /// Backend stderr output
    Diagnostic(String),
    Command(Command<E>),
    Shutdown,
}

/// Run a session until `Shutdown` arrives or the input channel closes.
pub async fn run<H: EditorHost>(
    session: &mut Session<H>,
    mut local: mpsc::UnboundedReceiver<LocalEvent<H::Document>>,
    mut inputs: mpsc::UnboundedReceiver<SessionInput<H::Editor>>,
) {
    info!("Session started");

    loop {
        tokio::select! {
            biased;

            Some(event) = local.recv() => {
                session.handle_local(event);
            }

            input = inputs.recv() => {
                match input {
                    Some(SessionInput::Shutdown) | None => break,
                    Some(input) => handle_input(session, input).await,
                }
            }

            outcome = session.applied() => {
                while let Ok(event) = local.try_recv() {
                    session.handle_local(event);
                }
                session.on_applied(outcome);
            }
        }
    }

    info!("Session stopped");
}

async fn handle_input<H: EditorHost>(session: &mut Session<H>, input: SessionInput<H::Editor>) {
    match input {
        SessionInput::Line(line) => session.handle_line(line).await,
        SessionInput::Connected(outbound) => {
            debug!("Backend connected");
            session.attach(outbound);
        }
        SessionInput::Disconnected(code) => {
            session.detach();
            let message = match code {
                Some(code) => format!("Backend process exited with code {}", code),
                None => "Backend process was terminated by a signal".to_string(),
            };
            session.host().notify(NotifyLevel::Error, &message);
        }
        SessionInput::Notice(message) => session.host().notify(NotifyLevel::Info, &message),
        SessionInput::Diagnostic(message) => {
            session.host().notify(NotifyLevel::Error, &message)
        }
        SessionInput::Command(command) => {
            let result = match command {
                Command::CreateDocument(editor) => session.create_document(editor),
                Command::JoinDocument(id) => session.join_document(&id),
                Command::AddPeer(address) => session.add_peer(&address),
            };
            if let Err(e) = result {
                warn!("Command failed: {}", e);
            }
        }
        SessionInput::Shutdown => {}
    }
}
