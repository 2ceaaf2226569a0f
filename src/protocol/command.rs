//! Inbound command vocabulary
//!
//! Two spellings feed one [`Command`] type:
//! - canonical: `UPLOAD <name> <base64>`, `LIST`, `DOWNLOAD <name>`,
//!   `VIEW <name>`, `DELETE <name>`, `ELECTION` (verb case-insensitive)
//! - legacy: `upload <name>::<content>`, `download <name>`, `view <name>`,
//!   `delete <name>`, `coordinator`, `exit` (exact lower-case verb)
//!
//! The [`Dialect`] a request arrived in decides how upload content is
//! encoded and how the node spells its answer.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Upper-case verbs, base64 upload content
    Canonical,
    /// Lower-case verbs, raw inline upload content after `::`
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Upload { name: String, content: Vec<u8> },
    List,
    Download { name: String },
    View { name: String },
    Delete { name: String },
    Election,
    Coordinator,
    Exit,
    TestConnection,
}

impl Command {
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Upload { .. } => "UPLOAD",
            Command::List => "LIST",
            Command::Download { .. } => "DOWNLOAD",
            Command::View { .. } => "VIEW",
            Command::Delete { .. } => "DELETE",
            Command::Election => "ELECTION",
            Command::Coordinator => "COORDINATOR",
            Command::Exit => "EXIT",
            Command::TestConnection => "TEST_CONNECTION",
        }
    }

    pub fn is_mutating(&self) -> bool {
        matches!(self, Command::Upload { .. } | Command::Delete { .. })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("{0}")]
    Usage(&'static str),

    #[error("Invalid upload format.")]
    LegacyUpload,

    #[error("Failed to upload: invalid base64 content ({0})")]
    InvalidContent(String),

    /// `LIST` joins names with commas, so a stored name may not contain one
    #[error("Invalid file name: {0}")]
    InvalidName(String),
}

const UPLOAD_USAGE: &str = "Upload format: UPLOAD <filename> <base64_content>";
const LIST_USAGE: &str = "List format: LIST";
const DOWNLOAD_USAGE: &str = "Download format: DOWNLOAD <filename>";
const VIEW_USAGE: &str = "View format: VIEW <filename>";
const DELETE_USAGE: &str = "Delete format: DELETE <filename>";
const ELECTION_USAGE: &str = "Election format: ELECTION";

/// A parsed command plus the dialect it was spelled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub dialect: Dialect,
}

impl Request {
    pub fn canonical(command: Command) -> Self {
        Self {
            command,
            dialect: Dialect::Canonical,
        }
    }

    pub fn legacy(command: Command) -> Self {
        Self {
            command,
            dialect: Dialect::Legacy,
        }
    }

    /// Parse one protocol line (without its terminator)
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim_start()),
            None => (line, ""),
        };
        if verb.is_empty() {
            return Err(ParseError::Empty);
        }

        match verb {
            "upload" => parse_legacy_upload(rest).map(Request::legacy),
            "download" => legacy_name(rest, "Download format: download <filename>")
                .map(|name| Request::legacy(Command::Download { name })),
            "view" => legacy_name(rest, "View format: view <filename>")
                .map(|name| Request::legacy(Command::View { name })),
            "delete" => legacy_name(rest, "Delete format: delete <filename>")
                .map(|name| Request::legacy(Command::Delete { name })),
            "coordinator" => Ok(Request::legacy(Command::Coordinator)),
            "exit" => Ok(Request::legacy(Command::Exit)),
            _ => parse_canonical(&verb.to_ascii_uppercase(), rest).map(Request::canonical),
        }
    }

    /// Serialize back to a protocol line in this request's dialect.
    /// Commands with no legacy spelling use the canonical one.
    pub fn to_line(&self) -> String {
        match (self.dialect, &self.command) {
            (Dialect::Legacy, Command::Upload { name, content }) => {
                format!("upload {}::{}", name, String::from_utf8_lossy(content))
            }
            (Dialect::Legacy, Command::Download { name }) => format!("download {}", name),
            (Dialect::Legacy, Command::View { name }) => format!("view {}", name),
            (Dialect::Legacy, Command::Delete { name }) => format!("delete {}", name),
            (Dialect::Legacy, Command::Coordinator) => "coordinator".to_string(),
            (Dialect::Legacy, Command::Exit) => "exit".to_string(),
            (_, Command::Upload { name, content }) => {
                format!("UPLOAD {} {}", name, STANDARD.encode(content))
            }
            (_, Command::Download { name })
            | (_, Command::View { name })
            | (_, Command::Delete { name }) => format!("{} {}", self.command.verb(), name),
            (_, command) => command.verb().to_string(),
        }
    }
}

impl std::str::FromStr for Request {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Request::parse(s)
    }
}

fn parse_canonical(verb: &str, rest: &str) -> Result<Command, ParseError> {
    let args: Vec<&str> = rest.split_whitespace().collect();
    match verb {
        "UPLOAD" => match args.as_slice() {
            [name, encoded] => {
                let name = upload_name(name)?;
                let content = STANDARD
                    .decode(encoded)
                    .map_err(|e| ParseError::InvalidContent(e.to_string()))?;
                Ok(Command::Upload { name, content })
            }
            _ => Err(ParseError::Usage(UPLOAD_USAGE)),
        },
        "LIST" => no_args(&args, LIST_USAGE).map(|_| Command::List),
        "DOWNLOAD" => one_arg(&args, DOWNLOAD_USAGE).map(|name| Command::Download { name }),
        "VIEW" => one_arg(&args, VIEW_USAGE).map(|name| Command::View { name }),
        "DELETE" => one_arg(&args, DELETE_USAGE).map(|name| Command::Delete { name }),
        "ELECTION" => no_args(&args, ELECTION_USAGE).map(|_| Command::Election),
        "COORDINATOR" => Ok(Command::Coordinator),
        "EXIT" => Ok(Command::Exit),
        "TEST_CONNECTION" => Ok(Command::TestConnection),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}

fn no_args(args: &[&str], usage: &'static str) -> Result<(), ParseError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(ParseError::Usage(usage))
    }
}

fn one_arg(args: &[&str], usage: &'static str) -> Result<String, ParseError> {
    match args {
        [name] => Ok(name.to_string()),
        _ => Err(ParseError::Usage(usage)),
    }
}

fn parse_legacy_upload(rest: &str) -> Result<Command, ParseError> {
    let (name, content) = rest.split_once("::").ok_or(ParseError::LegacyUpload)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ParseError::LegacyUpload);
    }
    Ok(Command::Upload {
        name: upload_name(name)?,
        content: content.as_bytes().to_vec(),
    })
}

fn upload_name(name: &str) -> Result<String, ParseError> {
    if name.contains(',') {
        return Err(ParseError::InvalidName(name.to_string()));
    }
    Ok(name.to_string())
}

fn legacy_name(rest: &str, usage: &'static str) -> Result<String, ParseError> {
    let name = rest.trim();
    if name.is_empty() {
        return Err(ParseError::Usage(usage));
    }
    Ok(name.to_string())
}
