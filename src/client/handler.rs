use log::{error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::arbiter::Arbiter;
use crate::client::{Session, SessionRegistry};
use crate::error::ProtocolError;
use crate::error::handlers::handle_protocol_error;
use crate::protocol::{CommandStatus, close_all, handle_command, parse_command};

/// Outcome of reading one command line.
pub(crate) enum CommandLine {
    Eof,
    Line(String),
    /// The line exceeded the limit; holds the number of bytes discarded.
    TooLong(usize),
}

/// Reads one line of at most `limit` bytes. The remainder of a longer line
/// is drained in `limit`-sized chunks so it never sits in memory whole.
pub(crate) async fn read_command_line<R>(reader: &mut R, limit: usize) -> io::Result<CommandLine>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(limit as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(CommandLine::Eof);
    }

    if n > limit {
        let mut discarded = n;
        while buf.last() != Some(&b'\n') {
            buf.clear();
            let m = (&mut *reader)
                .take(limit as u64)
                .read_until(b'\n', &mut buf)
                .await?;
            if m == 0 {
                break;
            }
            discarded += m;
        }
        return Ok(CommandLine::TooLong(discarded));
    }

    String::from_utf8(buf)
        .map(CommandLine::Line)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Runs the command loop of an authenticated session.
///
/// - Reads one command line at a time and enforces the length limit.
/// - Runs each command on the blocking pool so a slow content index or
///   disk only holds up this session.
/// - Releases every handle the session still holds when it ends.
pub async fn handle_client(
    cmd_stream: TcpStream,
    mut session: Session,
    sessions: Arc<Mutex<SessionRegistry>>,
    client_addr: SocketAddr,
    arbiter: Arc<Arbiter>,
    max_command_length: usize,
) {
    let (read_half, mut write_half) = cmd_stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        match read_command_line(&mut reader, max_command_length).await {
            Ok(CommandLine::Eof) => {
                // Client closed the connection
                info!("Connection closed by client {}", client_addr);
                break;
            }
            Ok(CommandLine::TooLong(len)) => {
                warn!("Discarded {}-byte command line from {}", len, client_addr);
                let reply = handle_protocol_error(&ProtocolError::CommandTooLong(len));
                let _ = write_half.write_all(reply.as_bytes()).await;
            }
            Ok(CommandLine::Line(line)) => {
                let trimmed = line.trim_end_matches(['\r', '\n']);
                if trimmed.trim().is_empty() {
                    continue;
                }
                let command = match parse_command(trimmed) {
                    Ok(command) => command,
                    Err(e) => {
                        let _ = write_half
                            .write_all(handle_protocol_error(&e).as_bytes())
                            .await;
                        continue;
                    }
                };
                info!("Received from {}: {:?}", client_addr, command);

                let shared = Arc::clone(&arbiter);
                let joined = tokio::task::spawn_blocking(move || {
                    let result = handle_command(&mut session, &shared, &command);
                    (session, result)
                })
                .await;

                let result = match joined {
                    Ok((returned, result)) => {
                        session = returned;
                        result
                    }
                    Err(e) => {
                        error!("Command task for {} failed: {}", client_addr, e);
                        let mut sessions = sessions.lock().await;
                        sessions.remove(&client_addr);
                        return;
                    }
                };

                if let Some(msg) = &result.message {
                    if let Err(e) = write_half.write_all(msg.as_bytes()).await {
                        error!("Failed to reply to {}: {}", client_addr, e);
                        break;
                    }
                }
                if result.status == CommandStatus::CloseConnection {
                    info!("Client {} requested to quit", client_addr);
                    break;
                }
            }
            Err(e) => {
                error!("Failed to read from {}: {}", client_addr, e);
                break;
            }
        }
    }

    if session.open_handles() > 0 {
        let shared = Arc::clone(&arbiter);
        let _ = tokio::task::spawn_blocking(move || close_all(&mut session, &shared)).await;
    }

    let mut sessions = sessions.lock().await;
    sessions.remove(&client_addr);
    info!(
        "Client {} disconnected ({} sessions left)",
        client_addr,
        sessions.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next(reader: &mut &[u8], limit: usize) -> CommandLine {
        read_command_line(reader, limit).await.unwrap()
    }

    #[tokio::test]
    async fn test_overlong_line_is_drained() {
        let input = format!("STAT /DCIM\n{}\nQUIT\n", "x".repeat(100));
        let mut reader = input.as_bytes();

        assert!(matches!(next(&mut reader, 16).await, CommandLine::Line(l) if l == "STAT /DCIM\n"));
        assert!(matches!(next(&mut reader, 16).await, CommandLine::TooLong(101)));
        assert!(matches!(next(&mut reader, 16).await, CommandLine::Line(l) if l == "QUIT\n"));
        assert!(matches!(next(&mut reader, 16).await, CommandLine::Eof));
    }

    #[tokio::test]
    async fn test_unterminated_overlong_line() {
        let input = "y".repeat(40);
        let mut reader = input.as_bytes();

        assert!(matches!(next(&mut reader, 8).await, CommandLine::TooLong(40)));
        assert!(matches!(next(&mut reader, 8).await, CommandLine::Eof));
    }
}
