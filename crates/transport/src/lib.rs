//! Transport seam between the orchestrator and the remote speech service
//!
//! The orchestrator only ever sees [`ModelTransport`] and [`ModelStream`]:
//! text frames in, text frames out. What carries them (a socket, an
//! in-process peer, a test script) is this crate's business.

pub mod memory;
pub mod scripted;
pub mod stream;
pub mod ws;

pub use memory::{duplex_pair, DuplexStream, InMemoryTransport, PeerConnection};
pub use scripted::{ScriptedSession, ScriptedTransport};
pub use stream::{ModelStream, ModelTransport, TransportError};
pub use ws::WsTransport;
