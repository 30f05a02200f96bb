use log::{error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::arbiter::Arbiter;
use crate::client::handler::{CommandLine, read_command_line};
use crate::client::{Session, SessionRegistry, handle_client};
use crate::config::{SharedRuntimeConfig, StartupConfig};
use crate::error::ProtocolError;
use crate::error::handlers::handle_protocol_error;
use crate::protocol::responses::{READY, TOO_MANY_SESSIONS, format_response};
use crate::protocol::{CommandStatus, handle_auth_command, parse_command};

pub struct Server {
    sessions: Arc<Mutex<SessionRegistry>>,
    listener: TcpListener,
    arbiter: Arc<Arbiter>,
    runtime: SharedRuntimeConfig,
    max_command_length: usize,
}

impl Server {
    /// Binds the control listener described by `startup`.
    pub async fn bind(
        startup: &StartupConfig,
        runtime: SharedRuntimeConfig,
        arbiter: Arc<Arbiter>,
    ) -> io::Result<Self> {
        Self::bind_to(&startup.control_socket(), startup.max_command_length, runtime, arbiter)
            .await
    }

    /// Binds to an explicit address; `127.0.0.1:0` picks a free port.
    pub async fn bind_to(
        addr: &str,
        max_command_length: usize,
        runtime: SharedRuntimeConfig,
        arbiter: Arc<Arbiter>,
    ) -> io::Result<Self> {
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => {
                info!("Server bound to {}", addr);
                listener
            }
            Err(e) => {
                error!("Failed to bind to {}: {}", addr, e);
                return Err(e);
            }
        };

        Ok(Self {
            sessions: Arc::new(Mutex::new(SessionRegistry::new())),
            listener,
            arbiter,
            runtime,
            max_command_length,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn start(self) {
        let max_clients = self.runtime.read().await.max_clients;
        info!(
            "Starting scoped storage arbiter on {} (root {}, max {} clients)",
            self.local_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "<unknown>".into()),
            self.arbiter.storage_root().display(),
            max_clients
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let sessions = Arc::clone(&self.sessions);
                    let arbiter = Arc::clone(&self.arbiter);
                    let runtime = Arc::clone(&self.runtime);
                    let max_command_length = self.max_command_length;

                    // Spawn a task for each client so accept loop doesn't block
                    tokio::spawn(async move {
                        if let Err(e) = handle_new_client(
                            stream,
                            addr,
                            sessions,
                            arbiter,
                            runtime,
                            max_command_length,
                        )
                        .await
                        {
                            warn!("Failed to handle client {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
    }
}

/// Handles a new client: greets, authenticates, registers, and spawns session handler.
async fn handle_new_client(
    stream: TcpStream,
    client_addr: SocketAddr,
    sessions: Arc<Mutex<SessionRegistry>>,
    arbiter: Arc<Arbiter>,
    runtime: SharedRuntimeConfig,
    max_command_length: usize,
) -> Result<(), io::Error> {
    let mut reader = BufReader::new(stream);

    reader
        .get_mut()
        .write_all(format_response(READY, "Scoped storage arbiter ready").as_bytes())
        .await?;
    reader.get_mut().flush().await?;

    let mut session = Session::new();

    loop {
        let line = match read_command_line(&mut reader, max_command_length).await? {
            CommandLine::Eof => {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "Client disconnected during authentication",
                ));
            }
            CommandLine::TooLong(len) => {
                reader
                    .get_mut()
                    .write_all(
                        handle_protocol_error(&ProtocolError::CommandTooLong(len)).as_bytes(),
                    )
                    .await?;
                continue;
            }
            CommandLine::Line(line) => line,
        };

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.trim().is_empty() {
            continue;
        }

        let result = match parse_command(trimmed) {
            Ok(command) => handle_auth_command(&mut session, arbiter.grants(), &command),
            Err(e) => {
                reader
                    .get_mut()
                    .write_all(handle_protocol_error(&e).as_bytes())
                    .await?;
                continue;
            }
        };

        if let Some(msg) = &result.message {
            reader.get_mut().write_all(msg.as_bytes()).await?;
        }
        if result.status == CommandStatus::CloseConnection {
            return Ok(());
        }

        if session.is_authenticated() {
            let Some(caller) = session.caller().cloned() else {
                continue;
            };
            let max_clients = runtime.read().await.max_clients;
            let mut registry = sessions.lock().await;

            if registry.len() >= max_clients {
                reader
                    .get_mut()
                    .write_all(
                        format_response(TOO_MANY_SESSIONS, "Too many sessions. Try again later.")
                            .as_bytes(),
                    )
                    .await?;
                return Ok(()); // Close connection
            }

            registry.insert(client_addr, caller);
            info!(
                "Client {} registered ({} active sessions)",
                client_addr,
                registry.len()
            );
            drop(registry);

            // A pipelining client may already have buffered commands.
            if !reader.buffer().is_empty() {
                warn!(
                    "Discarding {} bytes sent by {} before authentication completed",
                    reader.buffer().len(),
                    client_addr
                );
            }
            let cmd_stream = reader.into_inner();

            // Hand off to session handler
            handle_client(
                cmd_stream,
                session,
                sessions,
                client_addr,
                arbiter,
                max_command_length,
            )
            .await;

            return Ok(());
        }
    }
}
