//! Backend subprocess connection.
//!
//! Spawns `<backend> --port <port>` with piped stdio and wires it to a session:
//! stdout is split into lines and decoded, stderr lines become error
//! notifications, and outbound messages are written to stdin one per line.
//! The process is never restarted; once it exits the session is told and
//! later sends fail fast.

use crate::config::BackendConfig;
use collab_core::codec::{self, CodecError, LineDecoder};
use collab_core::{Outbound, SessionInput};
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const READ_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Failed to spawn {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Backend process is not active")]
    NotRunning,

    #[error("Session is no longer listening to the backend")]
    SessionClosed,

    #[error("Backend process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("Failed to encode message: {0}")]
    Codec(#[from] CodecError),

    #[error("Failed to write to backend: {0}")]
    Write(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// Lifecycle of the backend process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No process (none configured, or the spawn failed)
    Inactive,
    Starting,
    Active,
    /// The process exited or was shut down
    Terminated,
}

/// A running backend process.
pub struct Backend {
    state: watch::Receiver<ConnectionState>,
    kill: Option<oneshot::Sender<()>>,
    exit: Option<JoinHandle<()>>,
}

impl Backend {
    /// Spawn the backend and connect it to a session's input channel.
    ///
    /// On success the session receives `Connected` followed by a notice; when
    /// the process later exits it receives `Disconnected` after the last
    /// stdout line.
    pub fn launch<E: Send + 'static>(
        config: &BackendConfig,
        inputs: mpsc::UnboundedSender<SessionInput<E>>,
    ) -> Result<Self> {
        let (state_tx, state) = watch::channel(ConnectionState::Starting);
        info!(
            "Starting backend {} on port {}",
            config.path.display(),
            config.port
        );

        let mut child = Command::new(&config.path)
            .args(config.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                state_tx.send_replace(ConnectionState::Inactive);
                BackendError::Spawn {
                    path: config.path.clone(),
                    source,
                }
            })?;

        let stdin = child.stdin.take().ok_or(BackendError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(BackendError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(BackendError::MissingPipe("stderr"))?;
        debug!("Backend spawned with pid {:?}", child.id());

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let notice = format!(
            "Backend process successfully running on port {}!",
            config.port
        );
        if inputs.send(SessionInput::Connected(outbound_tx)).is_err()
            || inputs.send(SessionInput::Notice(notice)).is_err()
        {
            // Dropping the child kills it
            warn!("Session closed before the backend started, stopping it");
            state_tx.send_replace(ConnectionState::Inactive);
            return Err(BackendError::SessionClosed);
        }
        state_tx.send_replace(ConnectionState::Active);

        tokio::spawn(async move {
            if let Err(e) = write_messages(stdin, outbound_rx).await {
                error!("Backend stdin closed: {}", e);
            }
        });
        let reader = tokio::spawn(read_lines(stdout, inputs.clone()));
        tokio::spawn(read_diagnostics(stderr, inputs.clone()));

        let (kill_tx, kill_rx) = oneshot::channel();
        let exit = tokio::spawn(async move {
            let code = wait_for_exit(child, kill_rx).await;
            // Deliver every stdout line before reporting the exit
            let _ = reader.await;
            state_tx.send_replace(ConnectionState::Terminated);
            info!("Backend process exited with code {:?}", code);
            let _ = inputs.send(SessionInput::Disconnected(code));
        });

        Ok(Self {
            state,
            kill: Some(kill_tx),
            exit: Some(exit),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch lifecycle changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the process has exited on its own.
    pub async fn terminated(&mut self) {
        let _ = self
            .state
            .wait_for(|state| *state == ConnectionState::Terminated)
            .await;
    }

    /// Kill the process and wait for it to be reaped.
    pub async fn shutdown(&mut self) -> Result<()> {
        let exit = self.exit.take().ok_or(BackendError::NotRunning)?;
        if self.state() == ConnectionState::Terminated {
            let _ = exit.await;
            return Err(BackendError::NotRunning);
        }
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
        let _ = exit.await;
        Ok(())
    }
}

async fn wait_for_exit(mut child: Child, kill: oneshot::Receiver<()>) -> Option<i32> {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            debug!("Killing backend process");
            if let Err(e) = child.kill().await {
                warn!("Failed to kill backend process: {}", e);
            }
            child.wait().await
        }
    };
    match status {
        Ok(status) => status.code(),
        Err(e) => {
            error!("Failed to wait for backend process: {}", e);
            None
        }
    }
}

/// Write outbound messages, one JSON object per line, until the channel closes.
pub async fn write_messages<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) -> Result<()> {
    while let Some(message) = outbound.recv().await {
        let bytes = codec::encode(&message)?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        debug!("Wrote {} message to backend", message.kind());
    }
    Ok(())
}

/// Forward decoded stdout lines to the session until EOF.
pub async fn read_lines<R: AsyncRead + Unpin, E>(
    mut reader: R,
    inputs: mpsc::UnboundedSender<SessionInput<E>>,
) {
    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in decoder.feed(&buf[..n]) {
                    if inputs.send(SessionInput::Line(line)).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                error!("Error reading from backend: {}", e);
                break;
            }
        }
    }

    if let Some(line) = decoder.finish() {
        let _ = inputs.send(SessionInput::Line(line));
    }
    debug!("Backend stdout closed");
}

/// Forward stderr lines to the session as error notifications.
pub async fn read_diagnostics<R: AsyncRead + Unpin, E>(
    reader: R,
    inputs: mpsc::UnboundedSender<SessionInput<E>>,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                warn!("Backend stderr: {}", line);
                let message = format!("Backend error: {}", line);
                if inputs.send(SessionInput::Diagnostic(message)).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                error!("Error reading backend stderr: {}", e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_core::{Change, EditorId};
    use serde_json::json;

    type Input = SessionInput<EditorId>;

    fn collect(rx: &mut mpsc::UnboundedReceiver<Input>) -> Vec<Input> {
        let mut inputs = Vec::new();
        while let Ok(input) = rx.try_recv() {
            inputs.push(input);
        }
        inputs
    }

    #[tokio::test]
    async fn test_write_messages_one_per_line() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Outbound::JoinDocument { id: "doc-1".into() })
            .unwrap();
        tx.send(Outbound::Change {
            document_id: "doc-1".into(),
            change: Change::Delete { index: 2, len: 1 },
        })
        .unwrap();
        drop(tx);

        let mut written = Vec::new();
        write_messages(&mut written, rx).await.unwrap();

        let text = String::from_utf8(written).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(
            lines,
            vec![
                json!({"type": "join_document", "id": "doc-1"}),
                json!({
                    "type": "change",
                    "document_id": "doc-1",
                    "change": {"type": "delete", "index": 2, "len": 1}
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_read_lines_reassembles_fragments() {
        let (mut writer, reader) = tokio::io::duplex(16);
        let (tx, mut rx) = mpsc::unbounded_channel::<Input>();
        let task = tokio::spawn(read_lines(reader, tx));

        writer
            .write_all(b"{\"type\":\"add_peer_response\",\"add")
            .await
            .unwrap();
        writer.write_all(b"ress\":\"a\"}\nnot json\n{\"a\":1}").await.unwrap();
        drop(writer);
        task.await.unwrap();

        let inputs = collect(&mut rx);
        assert_eq!(inputs.len(), 3);
        match &inputs[0] {
            SessionInput::Line(Ok(value)) => assert_eq!(value["address"], "a"),
            other => panic!("unexpected input: {:?}", other),
        }
        assert!(matches!(&inputs[1], SessionInput::Line(Err(_))));
        // Trailing line without a newline is flushed at EOF
        assert!(matches!(&inputs[2], SessionInput::Line(Ok(_))));
    }

    #[tokio::test]
    async fn test_read_diagnostics_prefixes_lines() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Input>();
        read_diagnostics(&b"port in use\nbye\n"[..], tx).await;

        let messages: Vec<String> = collect(&mut rx)
            .into_iter()
            .filter_map(|input| match input {
                SessionInput::Diagnostic(message) => Some(message),
                _ => None,
            })
            .collect();
        assert_eq!(messages, vec!["Backend error: port in use", "Backend error: bye"]);
    }

    #[tokio::test]
    async fn test_launch_missing_executable() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Input>();
        let config = BackendConfig::new("/nonexistent/collab-backend", 6969);

        let result = Backend::launch(&config, tx);
        assert!(matches!(result, Err(BackendError::Spawn { .. })));
        assert!(collect(&mut rx).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_without_session_fails() {
        let (tx, rx) = mpsc::unbounded_channel::<Input>();
        drop(rx);
        let config = BackendConfig::new("/bin/sh", 6969);

        let result = Backend::launch(&config, tx);
        assert!(matches!(result, Err(BackendError::SessionClosed)));
    }
}
