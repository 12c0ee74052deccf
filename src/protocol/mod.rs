//! Protocol module - wire format, request framing, and response frames.
//!
//! This module implements the framing used on the connection:
//! - 8-byte job name header
//! - JSON parameter blob followed by the raw payload
//! - JSON response frames

mod frame_reader;
mod response;
mod wire_format;

pub use frame_reader::{parse_params, FrameReader, Params, Request};
pub use response::{ResponseFrame, Status, DONE_MESSAGE};
pub use wire_format::{build_request, decode_job_name, encode_job_name, HEADER_SIZE, PADDING};
