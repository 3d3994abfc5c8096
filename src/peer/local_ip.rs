use std::io;
use std::net::{IpAddr, Ipv4Addr};

use tokio::net::UdpSocket;

/// The local IP the OS would use for outbound traffic.
///
/// Connecting a UDP socket only selects a route; no packet is sent.
pub async fn resolve_local_ip() -> io::Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.connect(("8.8.8.8", 80)).await?;
    Ok(socket.local_addr()?.ip())
}
