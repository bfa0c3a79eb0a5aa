//! TCP proxy protocol
//!
//! One request/response exchange precedes every proxied byte stream:
//!
//! ```text
//!   initiator                               acceptor
//!      │ ── CONNECT { nodename, ip, port } ──▶ │
//!      │                                       │ dial ip:port (bounded retries)
//!      │ ◀──────── SUCCESS | FAILED ────────── │
//!      │ ═══════════ spliced bytes ═══════════ │  (SUCCESS only)
//! ```
//!
//! Messages are protobuf encoded and prefixed with their varint length.

pub mod codec;
pub mod message;
pub mod session;
pub mod tcp;

pub use codec::{read_message, write_message};
pub use message::{MessageType, ProxyMessage};
pub use session::{ProxySession, SessionEnd, SessionStats};
pub use tcp::{dial_target, TcpProxyService};

/// ALPN the proxy streams are negotiated under
pub const TCP_PROXY_ALPN: &[u8] = b"/tunnel/tcpproxy/1.0.0";

/// Largest frame either side accepts, in bytes
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024;
