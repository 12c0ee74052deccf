//! Wire format encoding and decoding.
//!
//! Implements the request frame layout:
//! ```text
//! ┌──────────────┬──────────────────┬──────────────────────┐
//! │ Job name     │ Parameters       │ Payload              │
//! │ 8 bytes      │ JSON object      │ raw bytes (optional) │
//! │ UTF-8, padded│ UTF-8            │ any number of chunks │
//! └──────────────┴──────────────────┴──────────────────────┘
//! ```
//!
//! The job name is padded with spaces or NUL bytes and trimmed on decode.
//! The payload begins at the first byte after the parameter object and
//! continues until the transport delivers an end-of-message marker.

use serde_json::{Map, Value};

use crate::error::{JobwireError, Result};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Padding byte used by [`encode_job_name`].
pub const PADDING: u8 = b' ';

/// Decode the job name from the first [`HEADER_SIZE`] bytes of a frame.
///
/// Leading and trailing whitespace and NUL padding are stripped.
///
/// # Example
///
/// ```
/// use jobwire::protocol::decode_job_name;
///
/// assert_eq!(decode_job_name(b"echo    ").unwrap(), "echo");
/// assert_eq!(decode_job_name(b"sum3\0\0\0\0").unwrap(), "sum3");
/// ```
pub fn decode_job_name(header: &[u8]) -> Result<String> {
    if header.len() < HEADER_SIZE {
        return Err(JobwireError::MalformedHeader(format!(
            "header needs {} bytes, got {}",
            HEADER_SIZE,
            header.len()
        )));
    }

    let text = std::str::from_utf8(&header[..HEADER_SIZE])
        .map_err(|e| JobwireError::MalformedHeader(format!("job name is not UTF-8: {}", e)))?;

    let name = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if name.is_empty() {
        return Err(JobwireError::MalformedHeader("job name is empty".into()));
    }

    Ok(name.to_string())
}

/// Encode a job name into a space-padded header.
///
/// Fails if the name does not fit into [`HEADER_SIZE`] bytes.
pub fn encode_job_name(name: &str) -> Result<[u8; HEADER_SIZE]> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > HEADER_SIZE {
        return Err(JobwireError::MalformedHeader(format!(
            "job name '{}' must be 1-{} bytes",
            name, HEADER_SIZE
        )));
    }

    let mut header = [PADDING; HEADER_SIZE];
    header[..bytes.len()].copy_from_slice(bytes);
    Ok(header)
}

/// Build a complete request frame: header, parameter object, payload.
///
/// This is the client side of the protocol; the server never calls it
/// outside of tests.
pub fn build_request(name: &str, params: &Map<String, Value>, payload: &[u8]) -> Result<Vec<u8>> {
    let header = encode_job_name(name)?;
    let blob = serde_json::to_vec(params)?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + blob.len() + payload.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(&blob);
    frame.extend_from_slice(payload);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_space_padded() {
        assert_eq!(decode_job_name(b"echo    ").unwrap(), "echo");
    }

    #[test]
    fn test_decode_nul_padded() {
        assert_eq!(decode_job_name(b"countUp\0").unwrap(), "countUp");
    }

    #[test]
    fn test_decode_full_width_name() {
        assert_eq!(decode_job_name(b"eightchr").unwrap(), "eightchr");
    }

    #[test]
    fn test_decode_ignores_bytes_after_header() {
        assert_eq!(decode_job_name(b"echo    {\"text\":1}").unwrap(), "echo");
    }

    #[test]
    fn test_decode_short_header() {
        let err = decode_job_name(b"echo").unwrap_err();
        assert!(matches!(err, JobwireError::MalformedHeader(_)));
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let err = decode_job_name(&[0xFF, 0xFE, b'a', b'b', b' ', b' ', b' ', b' ']).unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }

    #[test]
    fn test_decode_blank_header() {
        let err = decode_job_name(b"        ").unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_encode_pads_with_spaces() {
        assert_eq!(&encode_job_name("echo").unwrap(), b"echo    ");
    }

    #[test]
    fn test_encode_rejects_long_name() {
        assert!(encode_job_name("far_too_long").is_err());
        assert!(encode_job_name("").is_err());
    }

    #[test]
    fn test_build_request_layout() {
        let params = json!({"text": "hi"});
        let frame = build_request("echo", params.as_object().unwrap(), b"\x01\x02").unwrap();

        assert_eq!(&frame[..HEADER_SIZE], b"echo    ");
        assert_eq!(&frame[HEADER_SIZE..frame.len() - 2], br#"{"text":"hi"}"#);
        assert_eq!(&frame[frame.len() - 2..], b"\x01\x02");
    }
}
