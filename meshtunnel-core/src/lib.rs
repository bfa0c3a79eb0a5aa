pub mod error;
pub mod types;
pub mod config;
pub mod identity;
pub mod storage;
pub mod directory;
pub mod host;
pub mod protocol;
pub mod agent;
pub mod server;
pub mod module;
pub mod forwarder;

pub use agent::{AgentCell, TunnelAgent};
pub use config::TunnelConfig;
pub use directory::PeerDirectory;
pub use error::{TunnelError, TunnelResult};
pub use forwarder::{ForwardTarget, TcpForwarder};
pub use module::TunnelModule;
pub use server::TunnelServer;
