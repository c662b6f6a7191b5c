//! Wire protocol shared by the scheduler server and every client.
//!
//! The protocol is a typed request/response pair per connection turn:
//! length-framed (u32 little-endian prefix) postcard-encoded messages over
//! buffered TCP. Operation names, argument order and enum values are fixed
//! at compile time by the `Request`/`Response` enums; server and client
//! link against the same schema.

pub mod codec;
pub mod types;

pub use codec::{MAX_FRAME_LEN, WireError, read_frame, write_frame};
pub use types::{Cookie, LinkClass, ProxyAddress, Request, Response, RetStatus, UserIdentity};
