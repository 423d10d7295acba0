//! Line console driving the in-memory editor.
//!
//! Each stdin line is one command. Editing commands act on the
//! [`MemoryHost`] directly, as a user typing would, while sharing commands
//! are forwarded to the session.

use collab_core::{
    Command, EditorHost, EditorId, MemoryHost, NotifyLevel, Selection, SessionInput,
};
use std::io::Write;
use thiserror::Error;
use tokio::sync::mpsc;

pub const USAGE: &str = "\
Commands:
  open <name> [text]                    open a local document
  share <editor>                        share a document with the backend
  join <id>                             join a shared document
  peer <address>                        connect to a peer
  insert <editor> <offset> <text>       type text
  delete <editor> <offset> <len>        delete text
  replace <editor> <offset> <len> <text>
  select <editor> <point> [mark]        move the caret or select
  show <editor>                         print a document
  list                                  list open editors
  help
  quit";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Missing argument <{0}>")]
    MissingArgument(&'static str),

    #[error("Invalid {name}: {value}")]
    InvalidNumber { name: &'static str, value: String },
}

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Open { name: String, text: String },
    Share(EditorId),
    Join(String),
    Peer(String),
    Insert {
        editor: EditorId,
        offset: usize,
        text: String,
    },
    Delete {
        editor: EditorId,
        offset: usize,
        len: usize,
    },
    Replace {
        editor: EditorId,
        offset: usize,
        len: usize,
        text: String,
    },
    Select {
        editor: EditorId,
        point: usize,
        mark: Option<usize>,
    },
    Show(EditorId),
    List,
    Help,
    Quit,
}

/// Whether the console keeps reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Splits off whitespace-separated words, leaving the rest of the line as text.
struct Words<'a> {
    rest: &'a str,
}

impl<'a> Words<'a> {
    fn word(&mut self, name: &'static str) -> Result<&'a str, ConsoleError> {
        let rest = self.rest.trim_start();
        if rest.is_empty() {
            return Err(ConsoleError::MissingArgument(name));
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let (word, tail) = rest.split_at(end);
        self.rest = tail;
        Ok(word)
    }

    fn number<T: std::str::FromStr>(&mut self, name: &'static str) -> Result<T, ConsoleError> {
        let word = self.word(name)?;
        word.parse().map_err(|_| ConsoleError::InvalidNumber {
            name,
            value: word.to_string(),
        })
    }

    fn optional_number(&mut self, name: &'static str) -> Result<Option<usize>, ConsoleError> {
        if self.rest.trim().is_empty() {
            Ok(None)
        } else {
            self.number(name).map(Some)
        }
    }

    /// Remainder of the line after a single separating space.
    fn text(&mut self) -> String {
        let rest = self.rest.strip_prefix(' ').unwrap_or(self.rest);
        self.rest = "";
        unescape(rest)
    }
}

/// Expand `\n`, `\t` and `\\`.
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Parse one console line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, ConsoleError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut args = Words { rest: line };
    let name = match args.word("command") {
        Ok(name) => name,
        Err(_) => return Ok(None),
    };

    let command = match name {
        "open" => ConsoleCommand::Open {
            name: args.word("name")?.to_string(),
            text: args.text(),
        },
        "share" => ConsoleCommand::Share(args.number("editor")?),
        "join" => ConsoleCommand::Join(args.word("id")?.to_string()),
        "peer" => ConsoleCommand::Peer(args.word("address")?.to_string()),
        "insert" => ConsoleCommand::Insert {
            editor: args.number("editor")?,
            offset: args.number("offset")?,
            text: args.text(),
        },
        "delete" => ConsoleCommand::Delete {
            editor: args.number("editor")?,
            offset: args.number("offset")?,
            len: args.number("len")?,
        },
        "replace" => ConsoleCommand::Replace {
            editor: args.number("editor")?,
            offset: args.number("offset")?,
            len: args.number("len")?,
            text: args.text(),
        },
        "select" => ConsoleCommand::Select {
            editor: args.number("editor")?,
            point: args.number("point")?,
            mark: args.optional_number("mark")?,
        },
        "show" => ConsoleCommand::Show(args.number("editor")?),
        "list" => ConsoleCommand::List,
        "help" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(ConsoleError::UnknownCommand(other.to_string())),
    };
    Ok(Some(command))
}

/// Run one command against the host and session.
pub fn execute(
    command: ConsoleCommand,
    host: &MemoryHost,
    session: &mpsc::UnboundedSender<SessionInput<EditorId>>,
    out: &mut impl Write,
) -> anyhow::Result<Flow> {
    match command {
        ConsoleCommand::Open { name, text } => {
            let editor = host.open(&name, &text);
            writeln!(out, "Opened editor {} ({})", editor, name)?;
        }
        ConsoleCommand::Share(editor) => {
            if host.document_name(&editor).is_err() {
                host.notify(NotifyLevel::Error, "No active editor window found.");
            } else {
                forward(session, Command::CreateDocument(editor))?;
            }
        }
        ConsoleCommand::Join(id) => forward(session, Command::JoinDocument(id))?,
        ConsoleCommand::Peer(address) => forward(session, Command::AddPeer(address))?,
        ConsoleCommand::Insert {
            editor,
            offset,
            text,
        } => host.edit(editor, offset, 0, &text)?,
        ConsoleCommand::Delete {
            editor,
            offset,
            len,
        } => host.edit(editor, offset, len, "")?,
        ConsoleCommand::Replace {
            editor,
            offset,
            len,
            text,
        } => host.edit(editor, offset, len, &text)?,
        ConsoleCommand::Select {
            editor,
            point,
            mark,
        } => host.select(editor, Selection::new(point, mark.unwrap_or(point)))?,
        ConsoleCommand::Show(editor) => show(host, editor, out)?,
        ConsoleCommand::List => {
            for (editor, name) in host.editors() {
                writeln!(out, "{}\t{}", editor, name)?;
            }
        }
        ConsoleCommand::Help => writeln!(out, "{}", USAGE)?,
        ConsoleCommand::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

fn forward(
    session: &mpsc::UnboundedSender<SessionInput<EditorId>>,
    command: Command<EditorId>,
) -> anyhow::Result<()> {
    session
        .send(SessionInput::Command(command))
        .map_err(|_| anyhow::anyhow!("Session is not running"))
}

fn show(host: &MemoryHost, editor: EditorId, out: &mut impl Write) -> anyhow::Result<()> {
    let name = host.document_name(&editor)?;
    let text = host.text(&editor)?;
    writeln!(out, "{} ({}):", editor, name)?;
    writeln!(out, "{}", text)?;

    if let Some(selection) = host.selection(editor) {
        let (start, end) = selection.range();
        match host.position_at(editor, selection.point) {
            Some(position) => writeln!(
                out,
                "selection {}..{} (caret at line {}, character {})",
                start,
                end,
                position.line + 1,
                position.character + 1
            )?,
            None => writeln!(out, "selection {}..{}", start, end)?,
        }
    }
    Ok(())
}
