//! Connection manager - discovers and binds the device, retrying until it
//! appears or the session is cancelled.

use std::time::Duration;

use tracing::{debug, error, info, instrument};

use crate::cancel::CancelToken;
use crate::protocol::constants::DEFAULT_BACKOFF_MS;
use crate::transport::{TransportError, UsbTransport};

/// One binding attempt against the bus.
///
/// `Err(TransportError::DeviceNotFound)` means "not plugged in yet" and is
/// expected while waiting; every other error is a transient failure.
pub trait DeviceBinder {
    type Transport: UsbTransport;

    fn try_bind(&mut self) -> Result<Self::Transport, TransportError>;
}

impl<T, F> DeviceBinder for F
where
    T: UsbTransport,
    F: FnMut() -> Result<T, TransportError>,
{
    type Transport = T;

    fn try_bind(&mut self) -> Result<T, TransportError> {
        self()
    }
}

/// Delay policy between binding attempts.
///
/// Fixed interval by default; a multiplier above 1 turns it into capped
/// exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: u32,
}

impl BackoffPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial: interval,
            max: interval,
            multiplier: 1,
        }
    }

    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: 2,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(attempt);
        self.initial
            .saturating_mul(factor)
            .min(self.max.max(self.initial))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(DEFAULT_BACKOFF_MS))
    }
}

/// Owns device discovery and hands out bound transports.
pub struct ConnectionManager<B: DeviceBinder> {
    binder: B,
    backoff: BackoffPolicy,
}

impl<B: DeviceBinder> ConnectionManager<B> {
    pub fn new(binder: B, backoff: BackoffPolicy) -> Self {
        Self { binder, backoff }
    }

    /// Block until a transport is bound.
    ///
    /// Returns `None` only when `cancel` fires; binding failures are logged
    /// and retried indefinitely.
    #[instrument(skip_all)]
    pub fn bind(&mut self, cancel: &CancelToken) -> Option<B::Transport> {
        let mut attempt = 0u32;

        while !cancel.is_cancelled() {
            match self.binder.try_bind() {
                Ok(transport) => {
                    info!(
                        vid = %format!("{:04X}", transport.vendor_id()),
                        pid = %format!("{:04X}", transport.product_id()),
                        attempts = attempt + 1,
                        "Successfully connected to Switch"
                    );
                    return Some(transport);
                }
                Err(TransportError::DeviceNotFound { .. }) => {
                    debug!("Waiting for switch...");
                }
                Err(e @ TransportError::EndpointNotFound { .. }) => {
                    error!(error = %e, "Failed to find USB endpoints");
                }
                Err(e) => {
                    error!(error = %e, "USB error during connection");
                }
            }

            if !cancel.sleep(self.backoff.delay(attempt)) {
                break;
            }
            attempt = attempt.saturating_add(1);
        }

        info!("Connection attempt cancelled");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use std::cell::Cell;

    #[test]
    fn test_binds_after_transient_failures() {
        let cancel = CancelToken::new();
        let calls = Cell::new(0);
        let binder = || {
            calls.set(calls.get() + 1);
            match calls.get() {
                1 => Err(TransportError::DeviceNotFound {
                    vid: 0x057E,
                    pid: 0x3000,
                }),
                2 => Err(TransportError::EndpointNotFound {
                    ep_type: "Bulk".into(),
                    direction: "In".into(),
                }),
                3 => Err(TransportError::ResetFailed("busy".into())),
                _ => Ok(MockTransport::new()),
            }
        };

        let mut manager = ConnectionManager::new(binder, BackoffPolicy::fixed(Duration::ZERO));
        assert!(manager.bind(&cancel).is_some());
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn test_cancel_stops_retrying() {
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let calls = Cell::new(0);
        let binder = || -> Result<MockTransport, TransportError> {
            calls.set(calls.get() + 1);
            if calls.get() == 5 {
                remote.cancel();
            }
            Err(TransportError::DeviceNotFound {
                vid: 0x057E,
                pid: 0x3000,
            })
        };

        let mut manager = ConnectionManager::new(binder, BackoffPolicy::fixed(Duration::ZERO));
        assert!(manager.bind(&cancel).is_none());
        assert_eq!(calls.get(), 5);
    }

    #[test]
    fn test_already_cancelled_never_binds() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let calls = Cell::new(0);
        let binder = || -> Result<MockTransport, TransportError> {
            calls.set(calls.get() + 1);
            Ok(MockTransport::new())
        };
        let mut manager = ConnectionManager::new(binder, BackoffPolicy::default());
        assert!(manager.bind(&cancel).is_none());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_backoff_policy() {
        let fixed = BackoffPolicy::fixed(Duration::from_secs(1));
        assert_eq!(fixed.delay(0), Duration::from_secs(1));
        assert_eq!(fixed.delay(10), Duration::from_secs(1));

        let exp = BackoffPolicy::exponential(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(exp.delay(0), Duration::from_millis(100));
        assert_eq!(exp.delay(1), Duration::from_millis(200));
        assert_eq!(exp.delay(2), Duration::from_millis(400));
        assert_eq!(exp.delay(5), Duration::from_secs(1));
        assert_eq!(exp.delay(u32::MAX), Duration::from_secs(1));
    }
}
