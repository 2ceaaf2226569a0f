//! Outbound response lines

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;

use crate::common::ClientId;
use crate::protocol::command::{Command, Dialect, Request};

/// Literal `LIST` payload for an empty store
pub const NO_FILES: &str = "No files available";

/// Legacy `coordinator` answer prefix, followed by the id
pub const LEGACY_COORDINATOR: &str = "Current coordinator: Client ";

/// Legacy `coordinator` answer when nobody is registered
pub const LEGACY_NO_COORDINATOR: &str = "No coordinator elected";

/// One response line, rendered by `Display` without its terminator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(String),
    Error(String),
    /// `FILE <name> <base64>`
    File { name: String, content: Vec<u8> },
    /// `FILE <content>`, escaped inline
    LegacyFile(String),
    /// `FILES a,b,c` or the empty sentinel
    Files(Vec<String>),
    /// `CONTENT <content>`, escaped inline
    Content(String),
    /// `VIEW <content>`, escaped inline
    View(String),
    Deleted(String),
    Coordinator(String),
    AssignId(ClientId),
    Bye,
    FileAdded(String),
    FileDeleted(String),
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok(msg) => write!(f, "OK {}", msg),
            Response::Error(msg) => write!(f, "ERROR {}", msg),
            Response::File { name, content } => {
                write!(f, "FILE {} {}", name, STANDARD.encode(content))
            }
            Response::LegacyFile(content) => write!(f, "FILE {}", escape_line(content)),
            Response::Files(names) if names.is_empty() => write!(f, "FILES {}", NO_FILES),
            Response::Files(names) => write!(f, "FILES {}", names.join(",")),
            Response::Content(content) => write!(f, "CONTENT {}", escape_line(content)),
            Response::View(content) => write!(f, "VIEW {}", escape_line(content)),
            Response::Deleted(msg) => write!(f, "DEL {}", msg),
            Response::Coordinator(msg) => write!(f, "COORDINATOR {}", msg),
            Response::AssignId(id) => write!(f, "ASSIGN_ID {}", id),
            Response::Bye => write!(f, "BYE Goodbye!"),
            Response::FileAdded(name) => write!(f, "FILE_ADDED {}", name),
            Response::FileDeleted(name) => write!(f, "FILE_DELETED {}", name),
        }
    }
}

/// Is this line a broadcast notice rather than an answer to a request?
pub fn is_notice(line: &str) -> bool {
    line.starts_with("FILE_ADDED ") || line.starts_with("FILE_DELETED ")
}

/// Is `line` the answer to `request`, as opposed to a notice or an
/// unsolicited coordinator announcement?
///
/// A legacy `coordinator` answer is worded, so announcements never pass
/// for it. Canonical coordinator answers and `ELECTION` replies share the
/// announcement's shape.
pub fn is_reply_to(request: &Request, line: &str) -> bool {
    if is_notice(line) {
        return false;
    }
    let Some(message) = line.strip_prefix("COORDINATOR ") else {
        return true;
    };
    match (&request.command, request.dialect) {
        (Command::Coordinator, Dialect::Legacy) => {
            message.starts_with(LEGACY_COORDINATOR) || message == LEGACY_NO_COORDINATOR
        }
        (Command::Coordinator, _) | (Command::Election, _) => true,
        _ => false,
    }
}

/// Escape a payload so it fits on one protocol line
pub fn escape_line(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for ch in content.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse [`escape_line`]. Unknown escapes are kept verbatim.
pub fn unescape_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
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
