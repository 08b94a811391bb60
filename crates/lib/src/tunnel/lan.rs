//! LAN-only endpoint: advertise ws://<lan-ip>:<port>/ws without a tunnel.

use crate::config;
use crate::tunnel::endpoint::TunnelEndpoint;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Any routable address works; connecting a UDP socket sends nothing, it only selects the outbound interface.
const ROUTE_PROBE: &str = "8.8.8.8:80";

/// Address of the interface used for outbound traffic, if the host has a route.
pub fn outbound_ip() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(ROUTE_PROBE)?;
    Ok(socket.local_addr()?.ip())
}

/// Address the phone should dial: the bind address when it is concrete, otherwise the outbound interface.
pub fn advertised_ip(bind: &str) -> IpAddr {
    if !config::is_wildcard_bind(bind) {
        if let Ok(ip) = bind.trim().parse::<IpAddr>() {
            return ip;
        }
    }
    match outbound_ip() {
        Ok(ip) => ip,
        Err(e) => {
            log::warn!("could not determine LAN address ({}), advertising 127.0.0.1", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// LAN endpoint for the gateway at `ip:port`.
pub fn lan_endpoint(ip: IpAddr, port: u16) -> TunnelEndpoint {
    let host = match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{}]", v6),
    };
    TunnelEndpoint::from_public_url(format!("http://{}:{}", host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lan_endpoint_uses_plain_ws() {
        let endpoint = lan_endpoint("192.168.1.42".parse().unwrap(), 8000);
        assert_eq!(endpoint.public_url(), "http://192.168.1.42:8000");
        assert_eq!(endpoint.relay_url(), "ws://192.168.1.42:8000/ws");
    }

    #[test]
    fn lan_endpoint_brackets_ipv6() {
        let endpoint = lan_endpoint("fe80::1".parse().unwrap(), 9000);
        assert_eq!(endpoint.relay_url(), "ws://[fe80::1]:9000/ws");
    }

    #[test]
    fn concrete_bind_is_advertised_as_is() {
        assert_eq!(advertised_ip("10.0.0.7"), "10.0.0.7".parse::<IpAddr>().unwrap());
    }
}
