//! Wire protocol shared by the gateway, the nodes and clients
//!
//! - [`command`]: the request vocabulary in both dialects
//! - [`response`]: response lines and inline escaping
//! - [`frame`]: the WebSocket subset used by browser clients

pub mod command;
pub mod frame;
pub mod response;

pub use command::{Command, Dialect, ParseError, Request};
pub use frame::{
    compute_accept_key, decode_text_frame, encode_frame, encode_text_frame, frame_text, Frame,
    FrameDecoder, FrameError, Opcode,
};
pub use response::{
    escape_line, is_notice, is_reply_to, unescape_line, Response, LEGACY_COORDINATOR,
    LEGACY_NO_COORDINATOR, NO_FILES,
};
