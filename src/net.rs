//! TCP transport for the command and video channels.
//!
//! The async side only moves bytes: inbound command lines are handed to the
//! command receiver worker over a channel, replies fan out to every connected
//! client through a broadcast channel, and accepted video sockets are handed to
//! the blocking video worker.

use crossbeam_channel::Sender;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::protocol::CommandLine;
use crate::video::VideoClient;

pub const REPLY_BROADCAST_CAPACITY: usize = 64;

pub struct CommandServer {
    listener: TcpListener,
    inbound: Sender<CommandLine>,
    replies: broadcast::Sender<String>,
}

impl CommandServer {
    pub async fn bind(
        addr: &str,
        inbound: Sender<CommandLine>,
        replies: broadcast::Sender<String>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Command server listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            inbound,
            replies,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn serve(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    info!("Command client connected: {}", peer);
                    let inbound = self.inbound.clone();
                    let replies = self.replies.subscribe();
                    tokio::spawn(async move {
                        if let Err(e) = handle_command_client(stream, peer, inbound, replies).await {
                            warn!("Command client {} error: {}", peer, e);
                        }
                        info!("Command client disconnected: {}", peer);
                    });
                }
                Err(e) => error!("Failed to accept command connection: {}", e),
            }
        }
    }
}

async fn handle_command_client(
    stream: TcpStream,
    peer: SocketAddr,
    inbound: Sender<CommandLine>,
    mut replies: broadcast::Receiver<String>,
) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();

    let reply_task = tokio::spawn(async move {
        loop {
            match replies.recv().await {
                Ok(line) => {
                    if writer.write_all(line.as_bytes()).await.is_err()
                        || writer.write_all(b"\n").await.is_err()
                    {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Client {} lagged, skipped {} replies", peer, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let result = loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break Ok(()),
            Ok(_) => {
                if line.trim().is_empty() {
                    continue;
                }
                let frame = CommandLine {
                    peer,
                    text: line.clone(),
                };
                if inbound.send(frame).is_err() {
                    debug!("Command receiver gone, closing {}", peer);
                    break Ok(());
                }
            }
            Err(e) => break Err(e),
        }
    };

    reply_task.abort();
    result
}

pub struct VideoServer {
    listener: TcpListener,
    clients: Sender<VideoClient>,
}

impl VideoServer {
    pub async fn bind(addr: &str, clients: Sender<VideoClient>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Video server listening on {}", listener.local_addr()?);
        Ok(Self { listener, clients })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn serve(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    info!("Video client connected: {}", peer);
                    match into_blocking(stream) {
                        Ok(client) => {
                            if self.clients.send(client).is_err() {
                                warn!("Video worker gone, dropping {}", peer);
                            }
                        }
                        Err(e) => warn!("Failed to prepare video socket for {}: {}", peer, e),
                    }
                }
                Err(e) => error!("Failed to accept video connection: {}", e),
            }
        }
    }
}

fn into_blocking(stream: TcpStream) -> io::Result<VideoClient> {
    let stream = stream.into_std()?;
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    Ok(Box::new(stream))
}
