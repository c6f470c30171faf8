//! Host link to a board running the network
//!
//! Frame: one start byte, then the raw pixels. The board answers with a single
//! byte holding the predicted class.

use std::io::{ErrorKind, Read, Write};

use crate::error::{HarnessError, Result};

/// First byte of every image frame
pub const START_MARKER: u8 = 0xAA;

/// Start marker followed by the pixels
pub fn encode_frame(pixels: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(pixels.len() + 1);
    frame.push(START_MARKER);
    frame.extend_from_slice(pixels);
    frame
}

/// A byte stream to the board, typically an opened serial device
pub struct BoardLink<T> {
    port: T,
}

impl<T: Read + Write> BoardLink<T> {
    pub fn new(port: T) -> Self {
        Self { port }
    }

    /// Send one image and wait for the board's answer.
    ///
    /// The read blocks for as long as the underlying stream does; an empty
    /// read or a read timeout is `NoResponse`.
    pub fn classify(&mut self, pixels: &[u8]) -> Result<u8> {
        self.port.write_all(&encode_frame(pixels))?;
        self.port.flush()?;
        tracing::debug!(bytes = pixels.len() + 1, "sent image frame");

        let mut reply = [0u8; 1];
        match self.port.read(&mut reply) {
            Ok(0) => Err(HarnessError::NoResponse),
            Ok(_) => Ok(reply[0]),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                Err(HarnessError::NoResponse)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn into_inner(self) -> T {
        self.port
    }
}
