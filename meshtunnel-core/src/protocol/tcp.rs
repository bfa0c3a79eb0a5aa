//! TCP proxy service
//!
//! Initiator and acceptor of the proxy handshake. The initiator resolves the
//! target node through the [`PeerDirectory`], reuses a punched path when one
//! exists and dials through the relay otherwise. The acceptor dials the
//! requested target with bounded retries and splices it into the stream.

use async_trait::async_trait;
use iroh::NodeId;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::codec::{read_message, write_message};
use super::message::{MessageType, ProxyMessage};
use super::session::ProxySession;
use super::TCP_PROXY_ALPN;
use crate::config::ProxyConfig;
use crate::directory::PeerDirectory;
use crate::error::{TunnelError, TunnelResult};
use crate::host::{ProxyStream, StreamHandler, TunnelHost};
use crate::types::ConnectionMode;

/// Dial `target`, giving up after `attempts` tries of at most `per_attempt` each.
pub async fn dial_target(
    target: SocketAddr,
    attempts: u32,
    per_attempt: Duration,
) -> TunnelResult<TcpStream> {
    let mut last_error = String::from("no attempt made");
    let mut made = 0;

    while made < attempts {
        made += 1;
        match tokio::time::timeout(per_attempt, TcpStream::connect(target)).await {
            Ok(Ok(socket)) => {
                debug!("Dialed {} on attempt {}", target, made);
                return Ok(socket);
            }
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => last_error = format!("timed out after {:?}", per_attempt),
        }
        debug!("Dial {}/{} to {} failed: {}", made, attempts, target, last_error);
    }

    Err(TunnelError::DialExhausted {
        target: target.to_string(),
        attempts: made,
        last_error,
    })
}

/// Proxy protocol endpoint on one host
pub struct TcpProxyService<H: TunnelHost> {
    host: Arc<H>,
    directory: Arc<PeerDirectory>,
    config: ProxyConfig,
}

impl<H: TunnelHost> Clone for TcpProxyService<H> {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            directory: self.directory.clone(),
            config: self.config.clone(),
        }
    }
}

impl<H: TunnelHost> TcpProxyService<H> {
    pub fn new(host: Arc<H>, directory: Arc<PeerDirectory>, config: ProxyConfig) -> Self {
        Self {
            host,
            directory,
            config,
        }
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Current path to `peer`
    pub fn connection_mode(&self, peer: NodeId) -> ConnectionMode {
        ConnectionMode::from_connection_count(self.host.connection_count(peer))
    }

    /// Open a stream that `node_name` splices into a TCP connection to `ip:port`.
    ///
    /// The returned stream is ready for application bytes. Failures after the
    /// stream was opened reset it before returning.
    pub async fn get_proxy_stream(
        &self,
        node_name: &str,
        ip: &str,
        port: u16,
    ) -> TunnelResult<H::Stream> {
        let record = self
            .directory
            .get(node_name)
            .await
            .map_err(|e| TunnelError::resolution(node_name, e))?;
        let peer = record.node_id().ok_or_else(|| {
            TunnelError::resolution(
                node_name,
                TunnelError::decoding(node_name, "record holds no addresses"),
            )
        })?;

        match self.connection_mode(peer) {
            ConnectionMode::Direct => {
                info!("Traffic to {} flows over a direct path", node_name);
            }
            ConnectionMode::Relay => {
                info!("Connecting to {} through the relay, hole punching may follow", node_name);
                self.host.connect(&record, TCP_PROXY_ALPN).await.map_err(|e| {
                    warn!("Failed to connect to {}: {}", node_name, e);
                    e
                })?;
            }
        }

        let mut stream = self.host.open_stream(peer, TCP_PROXY_ALPN).await?;
        debug!("Opened proxy stream to {}", node_name);

        let request = ProxyMessage::connect(node_name, ip, port);
        if let Err(e) = write_message(&mut stream, &request).await {
            stream.reset();
            return Err(TunnelError::protocol(format!(
                "failed to send CONNECT to {}: {}",
                node_name, e
            )));
        }

        let response = match tokio::time::timeout(
            self.config.message_read_timeout,
            read_message(&mut stream),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                stream.reset();
                return Err(TunnelError::protocol(format!(
                    "failed to read CONNECT result from {}: {}",
                    node_name, e
                )));
            }
            Err(_) => {
                stream.reset();
                return Err(TunnelError::timeout(
                    format!("CONNECT result from {}", node_name),
                    self.config.message_read_timeout,
                ));
            }
        };

        match response.message_type() {
            Ok(MessageType::Success) => {
                info!("Proxy stream to {}:{} via {} is ready", ip, port, node_name);
                Ok(stream)
            }
            Ok(MessageType::Failed) => {
                stream.reset();
                Err(TunnelError::ProxyRefused {
                    node_name: node_name.to_string(),
                    target: format!("{}:{}", ip, port),
                })
            }
            Ok(MessageType::Connect) => {
                stream.reset();
                Err(TunnelError::protocol(format!(
                    "{} answered CONNECT with CONNECT",
                    node_name
                )))
            }
            Err(e) => {
                stream.reset();
                Err(e)
            }
        }
    }

    /// Acceptor side of the handshake for one inbound stream.
    async fn accept_stream(&self, mut stream: H::Stream, remote: NodeId) -> TunnelResult<()> {
        let request = match tokio::time::timeout(
            self.config.message_read_timeout,
            read_message(&mut stream),
        )
        .await
        {
            Ok(Ok(request)) => request,
            Ok(Err(e)) => {
                stream.reset();
                return Err(e);
            }
            Err(_) => {
                stream.reset();
                return Err(TunnelError::timeout(
                    "reading CONNECT",
                    self.config.message_read_timeout,
                ));
            }
        };

        match request.message_type() {
            Ok(MessageType::Connect) => {}
            Ok(other) => {
                stream.reset();
                return Err(TunnelError::protocol(format!(
                    "expected CONNECT, got {}",
                    other.as_str()
                )));
            }
            Err(e) => {
                stream.reset();
                return Err(e);
            }
        }

        let dialed = match request.target_addr() {
            Ok(target) => {
                info!("Proxying for {} to {}", remote.fmt_short(), target);
                dial_target(target, self.config.dial_attempts, self.config.dial_timeout)
                    .await
                    .map(|socket| (target, socket))
            }
            Err(e) => Err(e),
        };

        let (target, socket) = match dialed {
            Ok(dialed) => dialed,
            Err(e) => {
                warn!("Refusing proxy request of {}: {}", remote.fmt_short(), e);
                if let Err(write_err) =
                    write_message(&mut stream, &ProxyMessage::response(MessageType::Failed)).await
                {
                    stream.reset();
                    return Err(write_err);
                }
                let _ = stream.shutdown().await;
                return Ok(());
            }
        };

        if let Err(e) =
            write_message(&mut stream, &ProxyMessage::response(MessageType::Success)).await
        {
            stream.reset();
            return Err(e);
        }

        let label = format!("{}->{}", remote.fmt_short(), target);
        ProxySession::new(label, stream, socket, self.config.half_close_timeout)
            .run()
            .await;
        Ok(())
    }
}

#[async_trait]
impl<H: TunnelHost> StreamHandler<H::Stream> for TcpProxyService<H> {
    async fn handle_stream(&self, stream: H::Stream, remote: NodeId) {
        debug!("New proxy stream from {}", remote.fmt_short());
        if let Err(e) = self.accept_stream(stream, remote).await {
            warn!("Proxy stream from {} aborted: {}", remote.fmt_short(), e);
        }
    }
}
