pub mod arp;
pub mod cli;
#[cfg(test)]
mod fixture;
pub mod net;
pub mod node;
pub mod protocol;
mod repl;
pub mod rip;
pub mod route;
pub mod router;
pub mod utils;

pub use net::vtlink::Args;
pub use protocol::DecodeError;

/// Trait to be implemented by payload to be sent over the network.
pub trait Message: Sized {
    /// Convert a message into bytes.
    fn into_bytes(self) -> Vec<u8>;
    /// Convert bytes into a message.
    fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError>;
}
