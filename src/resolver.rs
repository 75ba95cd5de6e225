use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::error::{DnsError, Result};

/// Largest DNS message we expect over UDP.
pub const MAX_PACKET_SIZE: usize = 4096;

/// An upstream resolver: anything that can turn query bytes into
/// response bytes under a deadline.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn resolve(&self, query: &[u8], deadline: Duration) -> Result<Vec<u8>>;
}

/// Forwards queries to a single upstream server over UDP.
pub struct UdpUpstream {
    server: SocketAddr,
}

impl UdpUpstream {
    pub fn new(server: SocketAddr) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Upstream for UdpUpstream {
    async fn resolve(&self, query: &[u8], deadline: Duration) -> Result<Vec<u8>> {
        let exchange = async {
            let socket = UdpSocket::bind("0.0.0.0:0").await?;
            socket.send_to(query, self.server).await?;

            let mut buf = vec![0u8; MAX_PACKET_SIZE];
            let (len, _) = socket.recv_from(&mut buf).await?;
            buf.truncate(len);
            Ok::<_, DnsError>(buf)
        };

        timeout(deadline, exchange)
            .await
            .map_err(|_| DnsError::Timeout)?
    }
}
