//! ApiBuilder -- fluent builder for constructing an [`Api`] session.
//!
//! Separates configuration from construction so that callers can set the
//! enumeration limit, the pending-transition policy, the service debug level
//! and the accepted service versions before opening the service.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use rsplib_control::{ApiBuilder, PendingPolicy};
//! use rsplib_core::Transport;
//!
//! # async fn example(transport: Arc<dyn Transport>) -> rsplib_core::Result<()> {
//! let api = ApiBuilder::new()
//!     .max_devices(4)
//!     .pending_policy(PendingPolicy::Wait {
//!         timeout: Duration::from_secs(2),
//!     })
//!     .build(transport);
//! api.open().await?;
//! # Ok(())
//! # }
//! ```

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use rsplib_core::transport::Transport;
use rsplib_core::types::{ApiVersion, DebugLevel, MAX_DEVICES};

use crate::api::Api;

/// What an update does when the device is mid stream start or stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingPolicy {
    /// Fail immediately with `StartPending` or `StopPending`.
    #[default]
    FailFast,
    /// Wait up to `timeout` for the transition to finish, then dispatch.
    Wait { timeout: Duration },
}

/// Resolved session configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub max_devices: usize,
    pub pending_policy: PendingPolicy,
    pub debug_level: DebugLevel,
    pub disable_heartbeat: bool,
    pub supported_versions: RangeInclusive<ApiVersion>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            max_devices: MAX_DEVICES,
            pending_policy: PendingPolicy::FailFast,
            debug_level: DebugLevel::Disable,
            disable_heartbeat: false,
            supported_versions: ApiVersion::new(3, 7)..=ApiVersion::new(3, 15),
        }
    }
}

/// Fluent builder for [`Api`].
///
/// All configuration has sensible defaults, so the simplest usage is:
///
/// ```ignore
/// let api = ApiBuilder::new().build(transport);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ApiBuilder {
    config: ApiConfig,
}

impl ApiBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upper bound on devices returned by enumeration (default and maximum: 16).
    pub fn max_devices(mut self, n: usize) -> Self {
        self.config.max_devices = n.clamp(1, MAX_DEVICES);
        self
    }

    /// Behaviour of updates issued during a stream start or stop
    /// (default: [`PendingPolicy::FailFast`]).
    pub fn pending_policy(mut self, policy: PendingPolicy) -> Self {
        self.config.pending_policy = policy;
        self
    }

    /// Service debug output level applied to every selected device.
    pub fn debug_level(mut self, level: DebugLevel) -> Self {
        self.config.debug_level = level;
        self
    }

    /// Stop the service from expecting keep-alives, so a debugger can pause
    /// the process without the service dropping the device.
    pub fn disable_heartbeat(mut self, disable: bool) -> Self {
        self.config.disable_heartbeat = disable;
        self
    }

    /// Service API versions accepted by [`Api::open`].
    pub fn supported_versions(mut self, versions: RangeInclusive<ApiVersion>) -> Self {
        self.config.supported_versions = versions;
        self
    }

    /// The configuration this builder would produce.
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Build an [`Api`] over `transport`. The service is not contacted until
    /// [`Api::open`].
    pub fn build(self, transport: Arc<dyn Transport>) -> Api {
        Api::new(transport, self.config)
    }
}
