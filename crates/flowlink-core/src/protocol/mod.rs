//! Wire protocol: binary framing plus the JSON dispatch convention.
//!
//! - **frame**: length-prefixed, kind-tagged binary framing (pure codec)
//! - **envelope**: the JSON request/notification/response payload shapes
//!   classified once at the router boundary

pub mod envelope;
pub mod frame;

pub use envelope::{Envelope, RpcErrorObject, RpcRequest, RpcResponse};
pub use frame::{Frame, FrameDecoder, MessageKind};
