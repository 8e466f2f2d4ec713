//! Wire protocol: one JSON-encoded [`Message`] per line.

use peerlink_core::Message;

/// Largest accepted frame, excluding the newline.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Frame encoding or decoding error.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Frame too large: {0} bytes")]
    TooLarge(usize),
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Encode a message as a newline-terminated frame.
///
/// # Errors
/// Returns error if the content cannot be serialized or is too large.
pub fn encode(message: &Message) -> Result<Vec<u8>, FrameError> {
    let mut frame = serde_json::to_vec(message)?;
    if frame.len() > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge(frame.len()));
    }
    frame.push(b'\n');
    Ok(frame)
}

/// Decode one line (with or without its terminator).
///
/// # Errors
/// Returns error if the line is too large or not a valid UTF-8 JSON message.
pub fn decode(line: &[u8]) -> Result<Message, FrameError> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.len() > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge(line.len()));
    }
    Ok(serde_json::from_slice(line)?)
}
