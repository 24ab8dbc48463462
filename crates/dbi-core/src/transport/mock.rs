//! Mock USB transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::traits::{TransportError, UsbTransport};
use crate::protocol::{
    CommandHeader, CommandId, CommandType, NINTENDO_VENDOR_ID, SWITCH_PRODUCT_ID,
};

/// Mock transport for unit testing session and handler logic.
///
/// Clones share state, so a test can keep a handle while the session owns
/// another. Once the scripted reads run out the peer is treated as gone and
/// reads fail with [`TransportError::Disconnected`].
#[derive(Clone)]
pub struct MockTransport {
    /// Queued frames to return on read.
    read_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Remaining writes before a simulated unplug.
    writes_until_disconnect: Arc<Mutex<Option<usize>>>,
    /// Simulated VID/PID.
    vid: u16,
    pid: u16,
    /// Whether device is "connected".
    connected: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            read_queue: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            writes_until_disconnect: Arc::new(Mutex::new(None)),
            vid: NINTENDO_VENDOR_ID,
            pid: SWITCH_PRODUCT_ID,
            connected: Arc::new(Mutex::new(true)),
        }
    }

    /// Queue raw bytes to be returned on the next read.
    pub fn queue_read(&self, bytes: &[u8]) {
        self.read_queue.lock().unwrap().push_back(bytes.to_vec());
    }

    /// Queue an encoded command header.
    pub fn queue_header(&self, header: &CommandHeader) {
        self.queue_read(&header.to_bytes());
    }

    /// Queue a device request header.
    pub fn queue_request(&self, cmd_id: CommandId, data_size: u32) {
        self.queue_header(&CommandHeader::new(CommandType::Request, cmd_id, data_size));
    }

    /// Queue a device acknowledgment header.
    pub fn queue_ack(&self, cmd_id: CommandId) {
        self.queue_header(&CommandHeader::ack(cmd_id, 0));
    }

    /// Number of scripted reads not yet consumed.
    pub fn pending_reads(&self) -> usize {
        self.read_queue.lock().unwrap().len()
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }

    /// Disconnect once `n` more writes have succeeded.
    pub fn disconnect_after_writes(&self, n: usize) {
        *self.writes_until_disconnect.lock().unwrap() = Some(n);
    }

}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbTransport for MockTransport {
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        let mut remaining = self.writes_until_disconnect.lock().unwrap();
        if let Some(n) = remaining.as_mut() {
            if *n == 0 {
                *self.connected.lock().unwrap() = false;
                return Err(TransportError::Disconnected);
            }
            *n -= 1;
        }
        self.write_log.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }

    fn read(&self, _max_len: usize) -> Result<Vec<u8>, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.read_queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(TransportError::Disconnected)
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}
