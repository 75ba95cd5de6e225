use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// Build a query: 12-byte header with the given id and RD set, one
/// question for `domain`, type A, class IN.
pub fn build_query(id: u16, domain: &str) -> Vec<u8> {
    let mut query = Vec::new();
    query.extend_from_slice(&id.to_be_bytes());
    query.extend_from_slice(&[0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    for label in domain.split('.') {
        query.push(label.len() as u8);
        query.extend_from_slice(label.as_bytes());
    }
    query.push(0);
    query.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
    query
}

/// Build a response to `query` carrying one A record with the given TTL
/// and address.
pub fn build_response(query: &[u8], ttl: u32, addr: [u8; 4]) -> Vec<u8> {
    let mut response = query.to_vec();
    response[2] = 0x81;
    response[3] = 0x80;
    response[7] = 1;
    response.extend_from_slice(&[0xC0, 0x0C, 0x00, 0x01, 0x00, 0x01]);
    response.extend_from_slice(&ttl.to_be_bytes());
    response.extend_from_slice(&[0x00, 0x04]);
    response.extend_from_slice(&addr);
    response
}

/// Spawn a scripted upstream DNS server on an ephemeral port. It answers
/// every query it receives with a one-record response using the given
/// TTL, echoing the query's id and question.
pub async fn spawn_scripted_upstream(ttl: u32, addr: [u8; 4]) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let local = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        while let Ok((len, src)) = socket.recv_from(&mut buf).await {
            let response = build_response(&buf[..len], ttl, addr);
            let _ = socket.send_to(&response, src).await;
        }
    });

    local
}
