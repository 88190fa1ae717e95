use log::{debug, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::UdpSocket;

/// Unicast socket for HELLO/BYE/DATA plus the multicast group used for ROUTE.
pub struct Transport {
    unicast: UdpSocket,
    multicast: Option<UdpSocket>,
    group: SocketAddr,
    member: AtomicBool,
}

impl Transport {
    /// Binds the unicast socket and, when `group` is an IPv4 multicast
    /// address, joins it on a second socket. Any other `group` address is
    /// only used as the destination of advertisements.
    pub async fn bind(local: SocketAddr, group: SocketAddr) -> io::Result<Self> {
        let unicast = UdpSocket::bind(local).await?;
        let multicast = match group.ip() {
            IpAddr::V4(group_ip) if group_ip.is_multicast() => {
                let interface = match local.ip() {
                    IpAddr::V4(ip) => ip,
                    IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
                };
                unicast.set_multicast_loop_v4(true)?;
                unicast.set_multicast_ttl_v4(1)?;
                Some(join_group(group_ip, group.port(), interface)?)
            }
            _ => {
                debug!("{} is not a multicast group, group reception disabled", group);
                None
            }
        };
        info!(
            "Transport bound on {} (group {})",
            unicast.local_addr()?,
            group
        );
        let member = AtomicBool::new(multicast.is_some());
        Ok(Self {
            unicast,
            multicast,
            group,
            member,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.unicast.local_addr()
    }

    pub fn group(&self) -> SocketAddr {
        self.group
    }

    pub fn is_member(&self) -> bool {
        self.member.load(Ordering::SeqCst)
    }

    pub async fn send_to(&self, bytes: &[u8], addr: SocketAddr) -> io::Result<()> {
        let sent = self.unicast.send_to(bytes, addr).await?;
        if sent != bytes.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short send to {}: {} of {} bytes", addr, sent, bytes.len()),
            ));
        }
        Ok(())
    }

    pub async fn send_multicast(&self, bytes: &[u8]) -> io::Result<()> {
        self.send_to(bytes, self.group).await
    }

    /// Next datagram from either socket.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        loop {
            let socket = match &self.multicast {
                Some(group) => tokio::select! {
                    ready = self.unicast.readable() => { ready?; &self.unicast }
                    ready = group.readable() => { ready?; group }
                },
                None => {
                    self.unicast.readable().await?;
                    &self.unicast
                }
            };
            match socket.try_recv_from(buf) {
                Ok(received) => return Ok(received),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Joins the group again after [`Transport::leave_group`]. No-op while
    /// already a member or without a group socket.
    pub fn rejoin_group(&self) -> io::Result<()> {
        if let (Some(socket), SocketAddr::V4(group)) = (&self.multicast, self.group) {
            if self.is_member() {
                return Ok(());
            }
            socket.join_multicast_v4(*group.ip(), self.interface()?)?;
            self.member.store(true, Ordering::SeqCst);
            info!("Rejoined multicast group {}", group);
        }
        Ok(())
    }

    pub fn leave_group(&self) -> io::Result<()> {
        if let (Some(socket), SocketAddr::V4(group)) = (&self.multicast, self.group) {
            if !self.is_member() {
                return Ok(());
            }
            if let Err(e) = socket.leave_multicast_v4(*group.ip(), self.interface()?) {
                warn!("Failed to leave multicast group {}: {}", group, e);
                return Err(e);
            }
            self.member.store(false, Ordering::SeqCst);
            info!("Left multicast group {}", group);
        }
        Ok(())
    }

    fn interface(&self) -> io::Result<Ipv4Addr> {
        Ok(match self.unicast.local_addr()?.ip() {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        })
    }
}

fn join_group(group: Ipv4Addr, port: u16, interface: Ipv4Addr) -> io::Result<UdpSocket> {
    let std_sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    std_sock.set_reuse_address(true)?;
    #[cfg(unix)]
    std_sock.set_reuse_port(true)?;
    std_sock.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    std_sock.join_multicast_v4(&group, &interface)?;
    std_sock.set_nonblocking(true)?;
    info!("Joined multicast group {}:{} on {}", group, port, interface);
    UdpSocket::from_std(std_sock.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unicast_send_and_recv_without_group() {
        let sink: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let a = Transport::bind("127.0.0.1:0".parse().unwrap(), sink).await.unwrap();
        let b = Transport::bind("127.0.0.1:0".parse().unwrap(), sink).await.unwrap();
        assert!(!a.is_member());

        a.send_to(b"ping", b.local_addr().unwrap()).await.unwrap();
        let mut buf = [0u8; 16];
        let (len, from) = b.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"ping");
        assert_eq!(from, a.local_addr().unwrap());
        assert!(b.leave_group().is_ok());
        assert!(b.rejoin_group().is_ok());
        assert!(!b.is_member());
    }

    #[tokio::test]
    async fn test_group_leave_and_rejoin() {
        let group: SocketAddr = "239.255.42.97:47197".parse().unwrap();
        let a = Transport::bind("127.0.0.1:0".parse().unwrap(), group).await.unwrap();
        let b = Transport::bind("127.0.0.1:0".parse().unwrap(), group).await.unwrap();
        assert!(b.is_member());

        a.send_multicast(b"route").await.unwrap();
        let mut buf = [0u8; 16];
        let (len, from) = tokio::time::timeout(std::time::Duration::from_secs(5), b.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"route");
        assert_eq!(from, a.local_addr().unwrap());

        b.leave_group().unwrap();
        assert!(!b.is_member());
        b.rejoin_group().unwrap();
        assert!(b.is_member());
    }
}
