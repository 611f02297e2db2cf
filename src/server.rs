use futures::FutureExt;
use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use strum::VariantNames;
use thiserror::Error as ThisError;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::codec::{self, FrameCodec};
use crate::commands::{Command, CommandError};
use crate::config::{Config, ConfigError};
use crate::connection::Connection;
use crate::frame::Frame;
use crate::mutation_log::MutationLog;
use crate::session::{Session, SessionFactory};
use crate::store::Store;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("server is already running")]
    AlreadyRunning,
    #[error("server is stopped")]
    Stopped,
    #[error("server stopped abnormally: connections were cancelled after the shutdown timeout")]
    StoppedAbnormally,
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, ThisError)]
enum ConnectionError {
    #[error(transparent)]
    Codec(#[from] codec::Error),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("connection cancelled")]
    Cancelled,
}

type Intake = mpsc::Receiver<(TcpStream, SocketAddr)>;

/// TCP front end. A fixed pool of `max_connections` workers serves the accepted connections,
/// each worker one connection at a time with its own session.
///
/// Stopping happens in two phases. The soft phase stops accepting and lets every connection
/// finish the request it is working on. If that takes longer than the timeout, the hard phase
/// cancels whatever is still waiting.
pub struct Server {
    config: Config,
    sessions: SessionFactory,
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    soft: CancellationToken,
    hard: CancellationToken,
    tracker: TaskTracker,
}

impl Server {
    /// Validates `config` and binds the listener. Connections are not served before `run`.
    pub async fn bind(config: Config) -> Result<Server, Error> {
        config.validate()?;

        let listener = TcpListener::bind(config.address()).await?;
        let local_addr = listener.local_addr()?;

        let sessions = SessionFactory::new(
            Store::new(),
            MutationLog::new(config.mutation_log_capacity),
            config.lock_timeout,
        );

        Ok(Server {
            config,
            sessions,
            listener: Mutex::new(Some(listener)),
            local_addr,
            soft: CancellationToken::new(),
            hard: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        self.sessions.store()
    }

    pub fn mutation_log(&self) -> &MutationLog {
        self.sessions.mutation_log()
    }

    /// Serves connections until `stop` is called. Fails on a listener error, when the
    /// server already ran, or when it was stopped.
    pub async fn run(&self) -> Result<(), Error> {
        if self.soft.is_cancelled() {
            return Err(Error::Stopped);
        }

        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| {
                if self.soft.is_cancelled() {
                    Error::Stopped
                } else {
                    Error::AlreadyRunning
                }
            })?;

        info!(
            address = %self.local_addr,
            max_connections = self.config.max_connections,
            "server listening"
        );
        debug!(commands = ?Command::VARIANTS, "supported commands");

        let (intake, connections) = mpsc::channel(self.config.max_connections);
        let connections = Arc::new(tokio::sync::Mutex::new(connections));

        for worker in 0..self.config.max_connections {
            self.tracker.spawn(work(
                worker,
                connections.clone(),
                self.sessions.clone(),
                FrameCodec::new(self.config.max_frame_size),
                self.soft.clone(),
                self.hard.clone(),
            ));
        }

        let result = self.accept(&listener, &intake).await;

        // Workers drain what is already queued and exit once they see the channel closed.
        drop(intake);
        drop(listener);
        self.tracker.close();

        result
    }

    async fn accept(
        &self,
        listener: &TcpListener,
        intake: &mpsc::Sender<(TcpStream, SocketAddr)>,
    ) -> Result<(), Error> {
        loop {
            let (stream, client_address) = tokio::select! {
                biased;
                _ = self.soft.cancelled() => return Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) if is_transient(&err) => {
                        warn!(error = %err, "failed to accept connection");
                        continue;
                    }
                    Err(err) => {
                        error!(error = %err, "listener failed");
                        return Err(err.into());
                    }
                },
            };

            debug!(%client_address, "accepted connection");

            // Waits while every worker is busy and the intake is full.
            tokio::select! {
                biased;
                _ = self.soft.cancelled() => return Ok(()),
                sent = intake.send((stream, client_address)) => {
                    if sent.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Stops the server, see the type level docs for the two phases. Returns
    /// `StoppedAbnormally` when the hard phase was needed.
    pub async fn stop(&self, timeout: Duration) -> Result<(), Error> {
        info!(?timeout, "stopping server");

        self.soft.cancel();
        self.tracker.close();
        // A server that never ran still owns its listener.
        drop(
            self.listener
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let result = match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                info!("server stopped");
                Ok(())
            }
            Err(_) => {
                warn!(?timeout, "shutdown timeout elapsed, cancelling connections");
                self.hard.cancel();
                self.tracker.wait().await;
                Err(Error::StoppedAbnormally)
            }
        };

        self.sessions.mutation_log().close();

        result
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

async fn work(
    worker: usize,
    connections: Arc<tokio::sync::Mutex<Intake>>,
    sessions: SessionFactory,
    codec: FrameCodec,
    soft: CancellationToken,
    hard: CancellationToken,
) {
    loop {
        let next = connections.lock().await.recv().await;
        let Some((stream, client_address)) = next else {
            break;
        };

        let session = sessions.create(hard.child_token());
        let handled = AssertUnwindSafe(handle_connection(
            stream,
            client_address,
            session,
            codec.clone(),
            soft.clone(),
            hard.clone(),
        ))
        .catch_unwind()
        .await;

        match handled {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%client_address, error = %err, "connection closed with error"),
            Err(_) => error!(%client_address, worker, "connection handler panicked"),
        }
    }

    debug!(worker, "worker exiting");
}

#[instrument(name = "connection", skip_all, fields(connection_id, client_address))]
async fn handle_connection(
    stream: TcpStream,
    client_address: SocketAddr,
    mut session: Session,
    codec: FrameCodec,
    soft: CancellationToken,
    hard: CancellationToken,
) -> Result<(), ConnectionError> {
    let mut conn = Connection::with_codec(stream, codec);

    tracing::Span::current()
        .record("connection_id", conn.id.to_string())
        .record("client_address", client_address.to_string());

    info!("connection opened");

    loop {
        // A soft stop lets the request in flight finish, but no new one is read.
        let frame = tokio::select! {
            biased;
            _ = soft.cancelled() => break,
            frame = conn.read_frame() => frame,
        };

        let res = match frame {
            Ok(Some(frame)) => {
                debug!(?frame, "received frame");

                match Command::try_from(frame) {
                    Ok(command) => match session.run(command).await {
                        Ok(res) => res,
                        Err(err) if err.is_fatal() => {
                            // Best effort, the connection is going away anyway.
                            let _ = write_reply(&mut conn, &err.to_frame(), &hard).await;
                            return Err(err.into());
                        }
                        Err(err) => err.to_frame(),
                    },
                    Err(err) => Frame::Error(err.to_string()),
                }
            }
            Ok(None) => break,
            Err(err @ codec::Error::FrameTooLarge(_)) => {
                let _ = write_reply(&mut conn, &Frame::Error(err.to_string()), &hard).await;
                return Err(err.into());
            }
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => {
                debug!(error = %err, "protocol error");
                Frame::Error(err.to_string())
            }
        };

        debug!(?res, "sending reply");
        write_reply(&mut conn, &res, &hard).await?;
    }

    info!("connection closed");
    Ok(())
}

async fn write_reply(
    conn: &mut Connection,
    res: &Frame,
    hard: &CancellationToken,
) -> Result<(), ConnectionError> {
    let written = tokio::select! {
        biased;
        _ = hard.cancelled() => return Err(ConnectionError::Cancelled),
        written = conn.write_frame(res) => written,
    };

    match written {
        // Nothing was written, the client still gets an answer.
        Err(codec::Error::Frame(err)) => {
            warn!(error = %err, "reply can not be encoded");
            let fallback = Frame::Error("ERR reply can not be encoded".to_string());

            tokio::select! {
                biased;
                _ = hard.cancelled() => Err(ConnectionError::Cancelled),
                written = conn.write_frame(&fallback) => written.map_err(Into::into),
            }
        }
        written => written.map_err(Into::into),
    }
}
