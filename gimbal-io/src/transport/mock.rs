//! In-memory transports for tests and simulated rigs

use super::Transport;
use crate::error::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Mock transport for unit testing
///
/// Scripted inbound bytes, captured outbound bytes.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Default)]
struct MockTransportInner {
    read_buffer: VecDeque<u8>,
    write_buffer: Vec<u8>,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject data to be read
    pub fn inject_read(&self, data: &[u8]) {
        self.inner.lock().read_buffer.extend(data);
    }

    /// Get all written data
    pub fn get_written(&self) -> Vec<u8> {
        self.inner.lock().write_buffer.clone()
    }

    /// Clear written data
    pub fn clear_written(&self) {
        self.inner.lock().write_buffer.clear();
    }

    /// Clear read buffer
    pub fn clear_read(&self) {
        self.inner.lock().read_buffer.clear();
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        let available = inner.read_buffer.len().min(buffer.len());

        for item in buffer.iter_mut().take(available) {
            if let Some(byte) = inner.read_buffer.pop_front() {
                *item = byte;
            }
        }

        Ok(available)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.inner.lock().write_buffer.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn available(&mut self) -> Result<usize> {
        Ok(self.inner.lock().read_buffer.len())
    }
}

/// One end of an in-memory duplex pipe
///
/// `pair()` returns two connected ends; bytes written to one are read
/// from the other. Used to wire a [`DeviceSession`](crate::session::DeviceSession)
/// to a [`GimbalDriver`](crate::driver::GimbalDriver) without hardware.
/// Clones share the underlying queues.
#[derive(Clone)]
pub struct MemoryLink {
    rx: Arc<Mutex<VecDeque<u8>>>,
    tx: Arc<Mutex<VecDeque<u8>>>,
}

impl MemoryLink {
    /// Create a connected pair of link ends
    pub fn pair() -> (MemoryLink, MemoryLink) {
        let a = Arc::new(Mutex::new(VecDeque::new()));
        let b = Arc::new(Mutex::new(VecDeque::new()));
        (
            MemoryLink {
                rx: a.clone(),
                tx: b.clone(),
            },
            MemoryLink { rx: b, tx: a },
        )
    }
}

impl Transport for MemoryLink {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut rx = self.rx.lock();
        let available = rx.len().min(buffer.len());

        for item in buffer.iter_mut().take(available) {
            if let Some(byte) = rx.pop_front() {
                *item = byte;
            }
        }

        Ok(available)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.tx.lock().extend(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn available(&mut self) -> Result<usize> {
        Ok(self.rx.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_round_trip() {
        let mut transport = MockTransport::new();
        transport.inject_read(b"GOAL_REACHED\n");

        let mut buf = [0u8; 64];
        let n = transport.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"GOAL_REACHED\n");

        transport.write(b"HOME\n").unwrap();
        assert_eq!(transport.get_written(), b"HOME\n");
    }

    #[test]
    fn test_memory_link_is_crossed() {
        let (mut client, mut device) = MemoryLink::pair();

        client.write(b"STOP\n").unwrap();
        assert_eq!(device.available().unwrap(), 5);

        let mut buf = [0u8; 16];
        let n = device.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"STOP\n");

        // Nothing echoes back to the writer
        assert_eq!(client.available().unwrap(), 0);
    }

    #[test]
    fn test_read_respects_buffer_length() {
        let (mut client, mut device) = MemoryLink::pair();
        device.write(b"MOVING\n").unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(client.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"MOV");
        assert_eq!(client.available().unwrap(), 4);
    }
}
