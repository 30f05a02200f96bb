//! Command handlers
//!
//! Dispatches parsed commands to the arbiter on behalf of a session and
//! renders one reply line per command. Handlers are synchronous; the session
//! loop runs them on the blocking pool.

use log::{info, warn};

use crate::arbiter::Arbiter;
use crate::auth::{GrantRegistry, validate_caller};
use crate::client::Session;
use crate::error::handlers::handle_error;
use crate::error::{ArbiterError, AuthError};
use crate::protocol::commands::{Command, CommandResult, CommandStatus};
use crate::protocol::responses::{
    CALLER_ACCEPTED, GOODBYE, HANDLE_OPENED, NOT_AUTHENTICATED, OK, format_response,
};
use crate::storage::EntryKind;

/// Dispatches a command from an authenticated session.
pub fn handle_command(session: &mut Session, arbiter: &Arbiter, command: &Command) -> CommandResult {
    let Some(caller) = session.caller().cloned() else {
        return not_authenticated();
    };

    let outcome = match command {
        Command::Caller(_) => Ok(format_response(
            CALLER_ACCEPTED,
            &format!("Already acting as {}", caller.package_name),
        )),
        Command::Create(path) => arbiter.create(&caller, path).map(|record| {
            format_response(OK, &format!("Created {} (row {})", record.path, record.row_id))
        }),
        Command::Mkdir(path) => arbiter
            .mkdir(&caller, path)
            .map(|()| format_response(OK, "Directory created")),
        Command::Delete(path) => arbiter
            .delete(&caller, path, false)
            .map(|result| format_response(OK, &format!("Deleted {}", result.path))),
        Command::DeleteTree(path) => arbiter.delete(&caller, path, true).map(|result| {
            format_response(
                OK,
                &format!("Deleted {} ({} files)", result.path, result.files_removed),
            )
        }),
        Command::Rename(from, to) => arbiter.rename(&caller, from, to).map(|result| {
            format_response(OK, &format!("Renamed {} to {}", result.from, result.to))
        }),
        Command::List(path) => arbiter.readdir(&caller, path).map(|entries| {
            let names: Vec<String> = entries.iter().map(|e| e.display_name()).collect();
            format_response(OK, &format!("{} entries: {}", names.len(), names.join(",")))
        }),
        Command::Stat(path) => arbiter.stat(&caller, path).map(|stat| match stat.kind {
            EntryKind::Directory => format_response(OK, &format!("dir {}", stat.path)),
            EntryKind::File => format_response(
                OK,
                &format!(
                    "file {} size={} type={} mime={} row={} owner={}",
                    stat.path,
                    stat.size,
                    stat.media_type.map(|t| t.to_string()).unwrap_or_default(),
                    stat.mime_type.unwrap_or_default(),
                    stat.row_id,
                    stat.owner.as_deref().unwrap_or("-"),
                ),
            ),
        }),
        Command::Open(path, mode) => arbiter.open(&caller, path, *mode).map(|handle| {
            let binding = handle.binding();
            let id = session.insert_handle(handle);
            format_response(HANDLE_OPENED, &format!("Handle {} {}", id, binding))
        }),
        Command::Read {
            handle,
            offset,
            len,
        } => read(session, *handle, *offset, *len),
        Command::Write {
            handle,
            offset,
            data,
        } => write(session, *handle, *offset, data),
        Command::Duplicate(handle) => duplicate(session, *handle),
        Command::Close(handle) => match session.take_handle(*handle) {
            Some(open) => arbiter
                .close(open)
                .map(|()| format_response(OK, &format!("Closed handle {}", handle))),
            None => Err(ArbiterError::InvalidHandle(*handle)),
        },
        Command::Quit => return quit(session, arbiter),
    };

    match outcome {
        Ok(message) => CommandResult::success(message),
        Err(e) => CommandResult::failure(&e.to_string(), handle_error(&e)),
    }
}

/// Dispatches a command from a session that has not authenticated yet.
/// Only `CALLER` and `QUIT` are accepted.
pub fn handle_auth_command(
    session: &mut Session,
    registry: &GrantRegistry,
    command: &Command,
) -> CommandResult {
    match command {
        Command::Caller(token) => match validate_caller(token, registry) {
            Ok(caller) => {
                info!(
                    "Caller {} (uid {}) authenticated",
                    caller.package_name, caller.uid
                );
                let message = format_response(
                    CALLER_ACCEPTED,
                    &format!("Caller {} accepted", caller.package_name),
                );
                session.set_caller(caller);
                CommandResult::success(message)
            }
            Err(e) => {
                let err = ArbiterError::from(e);
                CommandResult::failure(&err.to_string(), handle_error(&err))
            }
        },
        Command::Quit => CommandResult {
            status: CommandStatus::CloseConnection,
            message: Some(format_response(GOODBYE, "Goodbye")),
        },
        _ => not_authenticated(),
    }
}

fn not_authenticated() -> CommandResult {
    let err = AuthError::NotAuthenticated;
    CommandResult::failure(
        &err.to_string(),
        format_response(NOT_AUTHENTICATED, "Identify with CALLER <uid> first"),
    )
}

fn read(session: &Session, id: u64, offset: u64, len: usize) -> Result<String, ArbiterError> {
    let handle = session.handle(id).ok_or(ArbiterError::InvalidHandle(id))?;
    let data = handle
        .read_at(offset, len)
        .map_err(|e| ArbiterError::from_io(handle.path(), e))?;
    Ok(format_response(
        OK,
        &format!("{} {}", data.len(), hex::encode(&data)),
    ))
}

fn write(session: &mut Session, id: u64, offset: u64, data: &[u8]) -> Result<String, ArbiterError> {
    let handle = session
        .handle_mut(id)
        .ok_or(ArbiterError::InvalidHandle(id))?;
    let at = handle
        .write_at(offset, data)
        .map_err(|e| ArbiterError::from_io(handle.path(), e))?;
    Ok(format_response(
        OK,
        &format!("Wrote {} bytes at {}", data.len(), at),
    ))
}

fn duplicate(session: &mut Session, id: u64) -> Result<String, ArbiterError> {
    let handle = session.handle(id).ok_or(ArbiterError::InvalidHandle(id))?;
    let copy = handle
        .duplicate()
        .map_err(|e| ArbiterError::from_io(handle.path(), e))?;
    let binding = copy.binding();
    let new_id = session.insert_handle(copy);
    Ok(format_response(
        HANDLE_OPENED,
        &format!("Handle {} {}", new_id, binding),
    ))
}

/// Closes every handle of the session and signals the connection to close.
fn quit(session: &mut Session, arbiter: &Arbiter) -> CommandResult {
    close_all(session, arbiter);
    CommandResult {
        status: CommandStatus::CloseConnection,
        message: Some(format_response(GOODBYE, "Goodbye")),
    }
}

/// Releases every handle a session still holds.
pub fn close_all(session: &mut Session, arbiter: &Arbiter) {
    for handle in session.drain_handles() {
        let path = handle.path().to_string();
        if let Err(e) = arbiter.close(handle) {
            warn!("Failed to close handle on {}: {}", path, e);
        }
    }
}
