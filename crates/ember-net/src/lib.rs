//! TCP game server networking: admission, per-client sessions, pluggable
//! packet codecs, and identifier-based packet dispatch.

pub mod codec;
mod connection;
pub mod error;
pub mod framing;
pub mod guard;
pub mod manager;
pub mod packet;
pub mod registry;
pub mod session;
pub mod socket;


pub use codec::{CodecFactory, IdentityCodec, Lz4Codec, PacketCodec, XorCodec};
pub use error::{
    AdmissionError, CodecError, HandlerError, RegistryError, SessionError, StartupError,
};
pub use framing::{FrameError, FramingStrategy, read_frame, write_frame};
pub use guard::ConnectionGuard;
pub use manager::{ConnectionId, IdGenerator, NetworkManager, ServerConfig, SessionRegistry};
pub use packet::{Packet, PacketError};
pub use registry::{HandlerRegistry, HandlerRegistryBuilder, PacketHandler};
pub use session::{ClientSession, Dispatch, SessionState};
pub use socket::SocketOptions;
