//! Wire codec: length-prefixed framing and primitive encoders/decoders.
//!
//! Every frame is `u32_be len | u32_be seq | payload[len-4]`. A
//! length-prefixed string inside a payload is `u32_be n | bytes[n]`, raw
//! UTF-8 with no terminator.

pub mod frame;
pub mod opcode;

pub use frame::{FrameWriter, PayloadReader, RawFrame, ack, assemble, is_push_seq, nack, read_frame, write_frame};
pub use opcode::Opcode;
