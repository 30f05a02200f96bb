//! Control commands
//!
//! Parses one command line into a `Command`. Arguments are separated by
//! whitespace, so paths cannot contain spaces on the wire.

use crate::coordinator::OpenMode;
use crate::error::ProtocolError;

/// Largest read a single READ command may request.
pub const MAX_READ_LENGTH: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Caller(String),
    Create(String),
    Mkdir(String),
    Delete(String),
    DeleteTree(String),
    Rename(String, String),
    List(String),
    Stat(String),
    Open(String, OpenMode),
    Read { handle: u64, offset: u64, len: usize },
    Write { handle: u64, offset: u64, data: Vec<u8> },
    Duplicate(u64),
    Close(u64),
    Quit,
}

/// Outcome status of executing a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    Failure(String),
    CloseConnection,
}

/// Result of a command: its status and the reply line to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub status: CommandStatus,
    pub message: Option<String>,
}

impl CommandResult {
    pub fn success(message: String) -> Self {
        Self {
            status: CommandStatus::Success,
            message: Some(message),
        }
    }

    pub fn failure(reason: &str, message: String) -> Self {
        Self {
            status: CommandStatus::Failure(reason.to_string()),
            message: Some(message),
        }
    }
}

fn number<T: std::str::FromStr>(arg: &str) -> Result<T, ProtocolError> {
    arg.parse()
        .map_err(|_| ProtocolError::InvalidNumber(arg.to_string()))
}

/// Parses a raw command line.
pub fn parse_command(raw: &str) -> Result<Command, ProtocolError> {
    let mut parts = raw.split_whitespace();
    let cmd = parts.next().unwrap_or("").to_ascii_uppercase();
    let mut arg = |name: &'static str| parts.next().ok_or(ProtocolError::MissingArgument(name));

    let command = match cmd.as_str() {
        "CALLER" => Command::Caller(arg("uid")?.to_string()),
        "CREATE" => Command::Create(arg("path")?.to_string()),
        "MKDIR" => Command::Mkdir(arg("path")?.to_string()),
        "DEL" => Command::Delete(arg("path")?.to_string()),
        "RMTREE" => Command::DeleteTree(arg("path")?.to_string()),
        "RENAME" => {
            let from = arg("source")?.to_string();
            let to = arg("destination")?.to_string();
            Command::Rename(from, to)
        }
        "LIST" => Command::List(arg("path")?.to_string()),
        "STAT" => Command::Stat(arg("path")?.to_string()),
        "OPEN" => {
            let path = arg("path")?.to_string();
            let mode: OpenMode = arg("mode")?.parse()?;
            Command::Open(path, mode)
        }
        "READ" => {
            let handle: u64 = number(arg("handle")?)?;
            let offset: u64 = number(arg("offset")?)?;
            let len: usize = number(arg("length")?)?;
            if len > MAX_READ_LENGTH {
                return Err(ProtocolError::InvalidNumber(len.to_string()));
            }
            Command::Read {
                handle,
                offset,
                len,
            }
        }
        "WRITE" => {
            let handle: u64 = number(arg("handle")?)?;
            let offset: u64 = number(arg("offset")?)?;
            let data = hex::decode(arg("data")?).map_err(|_| ProtocolError::InvalidPayload)?;
            Command::Write {
                handle,
                offset,
                data,
            }
        }
        "DUP" => Command::Duplicate(number(arg("handle")?)?),
        "CLOSE" => Command::Close(number(arg("handle")?)?),
        "QUIT" => Command::Quit,
        "" => return Err(ProtocolError::UnknownCommand(String::new())),
        other => return Err(ProtocolError::UnknownCommand(other.to_string())),
    };
    Ok(command)
}
