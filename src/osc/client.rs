//! UDP client for AbletonOSC
//!
//! The channel opens lazily on first use and is reused across calls. Queries
//! register a pending entry keyed by address + arguments before sending, then
//! wait for the matching reply with a bounded timeout.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::codec::{decode_packet, OscArg, OscMessage};
use super::correlation::{CorrelationKey, PendingTable};
use super::OscTransport;
use crate::config::OscConfig;
use crate::error::{BridgeError, BridgeResult};

/// Largest datagram AbletonOSC produces comfortably fits here
const MAX_DATAGRAM: usize = 65_507;

/// AbletonOSC reports handler exceptions on this address
const ERROR_ADDRESS: &str = "/live/error";

/// Open sockets plus their receive tasks
struct Channel {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    receivers: Vec<JoinHandle<()>>,
}

impl Drop for Channel {
    fn drop(&mut self) {
        for task in &self.receivers {
            task.abort();
        }
    }
}

impl Channel {
    async fn send(&self, msg: &OscMessage) -> BridgeResult<()> {
        self.socket
            .send(&msg.encode())
            .await
            .map(|_| ())
            .map_err(|e| send_error(self.remote, e))
    }
}

/// AbletonOSC client over UDP
pub struct OscClient {
    config: OscConfig,
    channel: tokio::sync::Mutex<Option<Arc<Channel>>>,
    pending: Arc<PendingTable>,
}

impl OscClient {
    pub fn new(config: OscConfig) -> Self {
        Self {
            config,
            channel: tokio::sync::Mutex::new(None),
            pending: Arc::new(PendingTable::new()),
        }
    }

    pub fn config(&self) -> &OscConfig {
        &self.config
    }

    /// Number of requests currently waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub async fn is_open(&self) -> bool {
        self.channel.lock().await.is_some()
    }

    /// Get the open channel, opening it on first use
    async fn channel(&self) -> BridgeResult<Arc<Channel>> {
        let mut guard = self.channel.lock().await;
        if let Some(channel) = guard.as_ref() {
            return Ok(Arc::clone(channel));
        }

        let channel = Arc::new(self.open().await?);
        *guard = Some(Arc::clone(&channel));
        Ok(channel)
    }

    async fn open(&self) -> BridgeResult<Channel> {
        let endpoint = self.config.endpoint();
        let remote = tokio::net::lookup_host(&endpoint)
            .await
            .map_err(|e| BridgeError::Connection(format!("cannot resolve {}: {}", endpoint, e)))?
            .next()
            .ok_or_else(|| BridgeError::Connection(format!("{} resolved to no address", endpoint)))?;

        // Bind on the loopback interface for a local Live so ICMP
        // port-unreachable comes back to us as ConnectionRefused
        let local: SocketAddr = match remote {
            SocketAddr::V4(v4) if v4.ip().is_loopback() => "127.0.0.1:0".parse(),
            SocketAddr::V4(_) => "0.0.0.0:0".parse(),
            SocketAddr::V6(v6) if v6.ip().is_loopback() => "[::1]:0".parse(),
            SocketAddr::V6(_) => "[::]:0".parse(),
        }
        .map_err(|e| BridgeError::Connection(format!("bad local address: {}", e)))?;

        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| BridgeError::Connection(format!("cannot open UDP socket: {}", e)))?;
        socket
            .connect(remote)
            .await
            .map_err(|e| BridgeError::Connection(format!("cannot connect to {}: {}", remote, e)))?;
        let socket = Arc::new(socket);

        let mut receivers = vec![tokio::spawn(receive_loop(
            Arc::clone(&socket),
            Arc::clone(&self.pending),
            remote,
            "send",
        ))];

        if let Some(reply_port) = self.config.reply_port {
            let bind_addr: SocketAddr = if remote.is_ipv4() {
                SocketAddr::from(([0, 0, 0, 0], reply_port))
            } else {
                SocketAddr::from(([0u16; 8], reply_port))
            };
            let reply_socket = UdpSocket::bind(bind_addr).await.map_err(|e| {
                BridgeError::Connection(format!(
                    "cannot listen for replies on port {} ({}); is another bridge running?",
                    reply_port, e
                ))
            })?;
            receivers.push(tokio::spawn(receive_loop(
                Arc::new(reply_socket),
                Arc::clone(&self.pending),
                remote,
                "reply",
            )));
        }

        info!(
            "🎛️ OSC channel open to {} (replies on {})",
            remote,
            self.config
                .reply_port
                .map(|p| p.to_string())
                .unwrap_or_else(|| "send socket".to_string())
        );

        Ok(Channel {
            socket,
            remote,
            receivers,
        })
    }

    /// Close the channel; in-flight requests fail with a connection error
    pub async fn shutdown(&self) {
        if self.channel.lock().await.take().is_some() {
            let failed = self
                .pending
                .fail_all(BridgeError::Connection("OSC channel closed".to_string()));
            debug!(failed, "OSC channel closed");
        }
    }
}

#[async_trait]
impl OscTransport for OscClient {
    async fn query(&self, address: &str, args: Vec<OscArg>) -> BridgeResult<Vec<OscArg>> {
        let channel = self.channel().await?;
        let message = OscMessage::new(address, args.clone());

        // Register before sending so a fast reply can never be missed
        let (_ticket, reply) = self.pending.register(CorrelationKey::new(address, args));
        trace!("→ {}", message);
        channel.send(&message).await?;

        match tokio::time::timeout(self.config.timeout(), reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::Connection("OSC channel closed".to_string())),
            Err(_) => {
                debug!("⏱️ no reply to {} within {:?}", address, self.config.timeout());
                Err(BridgeError::Timeout {
                    address: address.to_string(),
                    timeout_ms: self.config.timeout_ms,
                })
            },
        }
    }

    async fn send(&self, address: &str, args: Vec<OscArg>) -> BridgeResult<()> {
        let channel = self.channel().await?;
        let message = OscMessage::new(address, args);
        trace!("→ {}", message);
        channel.send(&message).await
    }

    async fn close(&self) {
        self.shutdown().await;
    }
}

fn send_error(remote: SocketAddr, e: io::Error) -> BridgeError {
    match e.kind() {
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => unreachable_error(remote),
        _ => BridgeError::Connection(format!("send to {} failed: {}", remote, e)),
    }
}

fn unreachable_error(remote: SocketAddr) -> BridgeError {
    BridgeError::Connection(format!(
        "nothing is listening on {} (is Live running with AbletonOSC enabled?)",
        remote
    ))
}

/// Read datagrams until the task is aborted, routing replies to waiters
async fn receive_loop(
    socket: Arc<UdpSocket>,
    pending: Arc<PendingTable>,
    remote: SocketAddr,
    label: &'static str,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => dispatch_datagram(&buf[..len], from, &pending),
            // ICMP port-unreachable surfaces here on a connected socket
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
                ) =>
            {
                let failed = pending.fail_all(unreachable_error(remote));
                debug!(failed, "OSC {} socket: {} refused the datagram", label, remote);
            },
            Err(e) => {
                warn!("OSC {} socket receive error: {}", label, e);
                pending.fail_all(BridgeError::Connection(format!("receive failed: {}", e)));
                tokio::time::sleep(Duration::from_millis(100)).await;
            },
        }
    }
}

fn dispatch_datagram(data: &[u8], from: SocketAddr, pending: &PendingTable) {
    let messages = match decode_packet(data) {
        Ok(messages) => messages,
        Err(e) => {
            debug!("dropping datagram from {}: {}", from, e);
            return;
        },
    };

    for msg in messages {
        trace!("← {}", msg);
        if msg.address == ERROR_ADDRESS {
            let detail: Vec<String> = msg.args.iter().map(|a| a.to_string()).collect();
            warn!("AbletonOSC reported an error: {}", detail.join(" "));
            continue;
        }
        let address = msg.address.clone();
        if !pending.resolve(msg) {
            trace!(%address, "discarding stale reply");
        }
    }
}
