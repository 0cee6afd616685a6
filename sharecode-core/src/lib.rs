//! Share-code rendezvous core: code registry, multipart decoding, transfer wire format.
//! No sockets here; the node drives I/O.

pub mod mime;
pub mod multipart;
pub mod naming;
pub mod registry;
pub mod wire;

pub use multipart::{MultipartError, ParsedUpload};
pub use registry::{FileOffer, Registry, RegistryError, ShareCode, DEFAULT_CODE_RANGE};
