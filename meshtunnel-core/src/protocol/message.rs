//! Proxy handshake message

use std::net::{IpAddr, SocketAddr};

use crate::error::{TunnelError, TunnelResult};

/// Kind of a [`ProxyMessage`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    Connect = 1,
    Success = 2,
    Failed = 3,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Connect => "CONNECT",
            MessageType::Success => "SUCCESS",
            MessageType::Failed => "FAILED",
        }
    }
}

/// Handshake message, wire compatible with a proto2 message whose fields are
/// all optional.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ProxyMessage {
    #[prost(enumeration = "MessageType", optional, tag = "1")]
    pub kind: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub nodename: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub ip: Option<String>,
    #[prost(int32, optional, tag = "4")]
    pub port: Option<i32>,
}

impl ProxyMessage {
    /// Request that `node_name` connects to `ip:port`
    pub fn connect(node_name: &str, ip: &str, port: u16) -> Self {
        Self {
            kind: Some(MessageType::Connect as i32),
            nodename: Some(node_name.to_string()),
            ip: Some(ip.to_string()),
            port: Some(i32::from(port)),
        }
    }

    /// Response carrying only a type
    pub fn response(kind: MessageType) -> Self {
        Self {
            kind: Some(kind as i32),
            ..Default::default()
        }
    }

    /// Type of the message; missing or unknown types are protocol errors.
    pub fn message_type(&self) -> TunnelResult<MessageType> {
        let raw = self
            .kind
            .ok_or_else(|| TunnelError::protocol("message carries no type"))?;
        MessageType::try_from(raw)
            .map_err(|_| TunnelError::protocol(format!("unknown message type {}", raw)))
    }

    /// Target socket address of a CONNECT request
    pub fn target_addr(&self) -> TunnelResult<SocketAddr> {
        let ip = self
            .ip
            .as_deref()
            .ok_or_else(|| TunnelError::protocol("CONNECT carries no ip"))?;
        let ip: IpAddr = ip
            .parse()
            .map_err(|_| TunnelError::protocol(format!("CONNECT carries invalid ip '{}'", ip)))?;

        let port = self
            .port
            .ok_or_else(|| TunnelError::protocol("CONNECT carries no port"))?;
        let port = u16::try_from(port)
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| TunnelError::protocol(format!("CONNECT carries invalid port {}", port)))?;

        Ok(SocketAddr::new(ip, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_connect_fields() {
        let msg = ProxyMessage::connect("edge-b", "10.0.0.5", 80);
        assert_eq!(msg.message_type().unwrap(), MessageType::Connect);
        assert_eq!(msg.nodename.as_deref(), Some("edge-b"));
        assert_eq!(msg.target_addr().unwrap(), "10.0.0.5:80".parse().unwrap());
    }

    #[test]
    fn test_wire_layout_matches_proto2() {
        let bytes = ProxyMessage::response(MessageType::Success).encode_to_vec();
        // field 1, varint, value 2
        assert_eq!(bytes, vec![0x08, 0x02]);
    }

    #[test]
    fn test_unknown_and_missing_types_are_rejected() {
        let unknown = ProxyMessage {
            kind: Some(9),
            ..Default::default()
        };
        assert!(matches!(unknown.message_type(), Err(TunnelError::Protocol { .. })));
        assert!(ProxyMessage::default().message_type().is_err());
    }

    #[test]
    fn test_target_addr_rejects_bad_input() {
        let mut msg = ProxyMessage::connect("edge-b", "not-an-ip", 80);
        assert!(msg.target_addr().is_err());

        msg.ip = Some("10.0.0.5".to_string());
        msg.port = Some(70_000);
        assert!(msg.target_addr().is_err());

        msg.port = Some(-1);
        assert!(msg.target_addr().is_err());
    }
}
