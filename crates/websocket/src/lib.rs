pub mod backoff;
pub mod client;
pub mod messages;
pub mod presence;
pub mod typing;

pub use backoff::Backoff;
pub use client::{ConnectionState, SocketClient, SocketConfig, SocketEvent, TokenSource};
pub use messages::{ClientFrame, RpcFrame, ServerEvent};
