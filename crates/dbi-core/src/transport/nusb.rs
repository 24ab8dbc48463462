//! nusb-based USB transport implementation.

use nusb::io::{EndpointRead, EndpointWrite};
use nusb::transfer::{Bulk, In, Out};
use nusb::{MaybeFuture, list_devices};
use std::io::{ErrorKind, Read, Write};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::traits::{TransportError, UsbTransport};
use crate::connection::DeviceBinder;
use crate::protocol::constants::{
    DBI_ALT_SETTING, DBI_INTERFACE, DEFAULT_SETTLE_MS, NINTENDO_VENDOR_ID, SWITCH_PRODUCT_ID,
};

/// Transfer size used by the buffered endpoint reader/writer. Divides the
/// 1 MiB data segment so only the last transfer of a range is short.
const IO_BUFFER_SIZE: usize = 0x10000;

/// nusb-based USB transport.
///
/// Endpoint reader and writer stay open for the life of the binding so no
/// in-flight IN data is lost between calls.
pub struct NusbTransport {
    reader: Mutex<EndpointRead<Bulk>>,
    writer: Mutex<EndpointWrite<Bulk>>,
    timeout_ms: u64,
    vid: u16,
    pid: u16,
}

impl NusbTransport {
    /// Select the default configuration, resolve the bulk endpoint pair on
    /// interface (0,0), and claim it.
    #[instrument(level = "info", skip(device_info, timeout), fields(vid = format!("{:04X}", device_info.vendor_id()), pid = format!("{:04X}", device_info.product_id())))]
    pub fn open_configured(
        device_info: nusb::DeviceInfo,
        timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let vid = device_info.vendor_id();
        let pid = device_info.product_id();

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let config_value = device
            .configurations()
            .next()
            .map(|c| c.configuration_value())
            .ok_or_else(|| TransportError::ConfigurationFailed("no configurations".into()))?;
        device
            .set_configuration(config_value)
            .wait()
            .map_err(|e| TransportError::ConfigurationFailed(e.to_string()))?;

        let config = device
            .active_configuration()
            .map_err(|e| TransportError::ConfigurationFailed(e.to_string()))?;

        // Find BULK endpoints
        let mut in_endpoint: Option<u8> = None;
        let mut out_endpoint: Option<u8> = None;

        for iface in config.interfaces() {
            if iface.interface_number() != DBI_INTERFACE {
                continue;
            }
            for alt in iface.alt_settings() {
                if alt.alternate_setting() != DBI_ALT_SETTING {
                    continue;
                }
                for ep in alt.endpoints() {
                    if ep.transfer_type() != nusb::descriptors::TransferType::Bulk {
                        continue;
                    }
                    if ep.direction() == nusb::transfer::Direction::In {
                        in_endpoint.get_or_insert(ep.address());
                    } else {
                        out_endpoint.get_or_insert(ep.address());
                    }
                }
            }
        }

        let in_endpoint = in_endpoint.ok_or_else(|| TransportError::EndpointNotFound {
            ep_type: "Bulk".into(),
            direction: "In".into(),
        })?;
        let out_endpoint = out_endpoint.ok_or_else(|| TransportError::EndpointNotFound {
            ep_type: "Bulk".into(),
            direction: "Out".into(),
        })?;

        let interface = device.claim_interface(DBI_INTERFACE).wait().map_err(|e| {
            TransportError::ClaimInterfaceFailed {
                interface: DBI_INTERFACE,
                message: e.to_string(),
            }
        })?;

        let mut reader = interface
            .endpoint::<Bulk, In>(in_endpoint)
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .reader(IO_BUFFER_SIZE);
        let mut writer = interface
            .endpoint::<Bulk, Out>(out_endpoint)
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .writer(IO_BUFFER_SIZE);

        if let Some(timeout) = timeout {
            reader.set_read_timeout(timeout);
            writer.set_write_timeout(timeout);
        }

        info!(
            in_ep = %format!("0x{:02X}", in_endpoint),
            out_ep = %format!("0x{:02X}", out_endpoint),
            "Device opened successfully"
        );

        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            timeout_ms: timeout.map_or(0, |t| t.as_millis() as u64),
            vid,
            pid,
        })
    }

    fn map_io(&self, e: std::io::Error, read: bool) -> TransportError {
        match e.kind() {
            ErrorKind::TimedOut => TransportError::Timeout {
                timeout_ms: self.timeout_ms,
            },
            ErrorKind::BrokenPipe | ErrorKind::NotConnected | ErrorKind::ConnectionReset => {
                TransportError::Disconnected
            }
            _ if read => TransportError::ReadFailed(e.to_string()),
            _ => TransportError::WriteFailed(e.to_string()),
        }
    }
}

impl UsbTransport for NusbTransport {
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| TransportError::WriteFailed("writer lock poisoned".into()))?;

        writer.write_all(data).map_err(|e| self.map_io(e, false))?;
        writer.flush().map_err(|e| self.map_io(e, false))?;

        debug!(bytes_written = data.len(), "Write complete");
        Ok(data.len())
    }

    #[instrument(skip(self), fields(max_len))]
    fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let mut reader = self
            .reader
            .lock()
            .map_err(|_| TransportError::ReadFailed("reader lock poisoned".into()))?;
        let mut buf = vec![0u8; max_len];

        let n = reader.read(&mut buf).map_err(|e| self.map_io(e, true))?;

        buf.truncate(n);
        debug!(bytes_read = n, "Read complete");
        Ok(buf)
    }

    #[instrument(skip(self), fields(len))]
    fn read_exact(&self, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut reader = self
            .reader
            .lock()
            .map_err(|_| TransportError::ReadFailed("reader lock poisoned".into()))?;
        let mut buf = vec![0u8; len];

        reader.read_exact(&mut buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => TransportError::ShortRead {
                expected: len,
                actual: 0,
            },
            _ => self.map_io(e, true),
        })?;

        debug!(bytes_read = len, "Read complete");
        Ok(buf)
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

/// Discovers, resets, and binds the DBI device with nusb.
#[derive(Debug, Clone)]
pub struct NusbBinder {
    vid: u16,
    pid: u16,
    settle: Duration,
    timeout: Option<Duration>,
}

impl NusbBinder {
    pub fn new(vid: u16, pid: u16) -> Self {
        Self {
            vid,
            pid,
            settle: Duration::from_millis(DEFAULT_SETTLE_MS),
            timeout: None,
        }
    }

    /// Delay after the bus reset before the device is configured.
    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Per-transfer timeout; `None` blocks indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn find(&self) -> Result<nusb::DeviceInfo, TransportError> {
        list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| d.vendor_id() == self.vid && d.product_id() == self.pid)
            .ok_or(TransportError::DeviceNotFound {
                vid: self.vid,
                pid: self.pid,
            })
    }
}

impl Default for NusbBinder {
    fn default() -> Self {
        Self::new(NINTENDO_VENDOR_ID, SWITCH_PRODUCT_ID)
    }
}

impl DeviceBinder for NusbBinder {
    type Transport = NusbTransport;

    fn try_bind(&mut self) -> Result<NusbTransport, TransportError> {
        let device_info = self.find()?;

        // A reset re-enumerates the device and invalidates this handle, so the
        // device is looked up again once it has settled.
        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;
        debug!("Switch detected, resetting connection...");
        device
            .reset()
            .wait()
            .map_err(|e| TransportError::ResetFailed(e.to_string()))?;
        drop(device);

        thread::sleep(self.settle);

        NusbTransport::open_configured(self.find()?, self.timeout)
    }
}
