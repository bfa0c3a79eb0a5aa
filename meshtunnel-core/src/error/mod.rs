//! Error handling for meshtunnel
//!
//! Every fallible operation in the crate returns [`TunnelResult`]. The variants
//! of [`TunnelError`] follow the lifetime of a tunnel:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     meshtunnel error taxonomy                    │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Startup (fatal)     │  Directory           │  Proxy attempt      │
//! │  ┌────────────────┐  │  ┌────────────────┐  │  ┌───────────────┐  │
//! │  │ • Configuration│  │  │ • Encoding     │  │  │ • Resolution  │  │
//! │  │   (key, certs) │  │  │ • Decoding     │  │  │ • Connect     │  │
//! │  └────────────────┘  │  │ • NotFound     │  │  │ • StreamOpen  │  │
//! │                      │  │ • Store        │  │  │ • Protocol    │  │
//! │                      │  └────────────────┘  │  │ • Refused     │  │
//! │                      │                      │  │ • DialExhaust │  │
//! │                      │                      │  └───────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Startup errors terminate the process. Everything else is local to one
//! directory operation or one proxy attempt and never affects concurrent ones.

pub mod types;
pub mod constructors;
pub mod conversions;

#[cfg(test)]
mod tests;

pub use types::{TunnelError, TunnelResult};
