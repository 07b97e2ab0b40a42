//! Transport layer for the gimbal link

use crate::error::Result;

mod mock;
mod serial;

pub use mock::{MemoryLink, MockTransport};
pub use serial::SerialTransport;

/// Transport trait for device communication
pub trait Transport: Send {
    /// Read data into buffer, returns number of bytes read
    ///
    /// Returns `Ok(0)` when nothing is pending; callers poll.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write all data from buffer
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Flush any pending writes (blocking until complete)
    fn flush(&mut self) -> Result<()>;

    /// Check if data is available to read
    fn available(&mut self) -> Result<usize> {
        Ok(0) // Default implementation
    }
}

/// Append whatever bytes are pending to `buffer` without blocking
pub fn drain_into<T: Transport>(transport: &mut T, buffer: &mut Vec<u8>) -> Result<()> {
    let mut chunk = [0u8; 256];
    while transport.available()? > 0 {
        let n = transport.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
    Ok(())
}

/// Split one complete newline-terminated line off the front of `buffer`
///
/// The line is returned trimmed (tolerates CRLF); `None` until a full
/// line has arrived.
pub fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let newline = buffer.iter().position(|&b| b == b'\n')?;
    let raw: Vec<u8> = buffer.drain(..=newline).collect();
    Some(String::from_utf8_lossy(&raw[..newline]).trim().to_string())
}

/// Write a newline-terminated line and flush
pub fn write_line<T: Transport>(transport: &mut T, line: &str) -> Result<()> {
    transport.write(line.as_bytes())?;
    transport.write(b"\n")?;
    transport.flush()
}
