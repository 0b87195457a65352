//! Service session: open/close, enumeration, and device selection.
//!
//! [`Api`] is the entry point. It owns the transport and the configuration
//! chosen on the [`ApiBuilder`](crate::ApiBuilder). Opening is a one-shot
//! contract: a second `open` fails with `AlreadyInitialised`, and every other
//! call before `open` fails with `NotInitialised`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info, warn};

use rsplib_core::error::{ApiStatus, Error, Result};
use rsplib_core::params::DeviceParams;
use rsplib_core::transport::Transport;
use rsplib_core::types::{DebugLevel, DeviceHandle, DeviceInfo};

use crate::builder::{ApiBuilder, ApiConfig};
use crate::device::RspDevice;
use crate::dispatcher::Dispatcher;
use crate::state::{DeviceState, Shared};

/// A session with the receiver service.
pub struct Api {
    transport: Arc<dyn Transport>,
    config: ApiConfig,
    open: AtomicBool,
    /// Sessions handed out by `select`, ended on `close`.
    sessions: Mutex<Vec<Weak<Shared>>>,
}

impl Api {
    pub fn new(transport: Arc<dyn Transport>, config: ApiConfig) -> Self {
        Api {
            transport,
            config,
            open: AtomicBool::new(false),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn builder() -> ApiBuilder {
        ApiBuilder::new()
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Open the service and check its API version.
    ///
    /// A service outside the configured version range is closed again and
    /// reported as `InvalidServiceVersion`.
    pub async fn open(&self) -> Result<()> {
        if self
            .open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyInitialised);
        }

        let opened = self.open_checked().await;
        if opened.is_err() {
            self.open.store(false, Ordering::Release);
        }
        opened
    }

    async fn open_checked(&self) -> Result<()> {
        self.transport.open().await?;
        let version = match self.transport.api_version().await {
            Ok(version) => version,
            Err(e) => {
                let _ = self.transport.close().await;
                return Err(e);
            }
        };
        if !self.config.supported_versions.contains(&version) {
            warn!(
                %version,
                min = %self.config.supported_versions.start(),
                max = %self.config.supported_versions.end(),
                "unsupported service version"
            );
            let _ = self.transport.close().await;
            return Err(Error::Status(ApiStatus::InvalidServiceVersion));
        }
        info!(%version, "service opened");
        Ok(())
    }

    /// Close the service.
    ///
    /// Every device selected through this session is invalidated: its
    /// handlers are dropped and later operations fail with `NotInitialised`.
    pub async fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Err(Error::NotInitialised);
        }
        let sessions = std::mem::take(&mut *self.sessions());
        let ended = sessions
            .iter()
            .filter_map(Weak::upgrade)
            .inspect(|shared| shared.invalidate())
            .count();
        if ended > 0 {
            debug!(ended, "invalidated open device sessions");
        }
        self.transport.close().await?;
        info!("service closed");
        Ok(())
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, Vec<Weak<Shared>>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::NotInitialised)
        }
    }

    /// Enumerate attached devices, at most `max_devices` of them.
    pub async fn devices(&self) -> Result<Vec<DeviceInfo>> {
        self.ensure_open()?;
        let mut devices = self.transport.get_devices(self.config.max_devices).await?;
        devices.truncate(self.config.max_devices);
        debug!(count = devices.len(), "enumerated devices");
        Ok(devices)
    }

    /// Take exclusive ownership of `device` and load its parameters.
    ///
    /// For an RSPduo the `tuners`, `duo_mode` and `duo_sample_freq` fields
    /// of `device` choose the session's role. The service's device API lock
    /// is held for the duration of the selection.
    pub async fn select(&self, device: &DeviceInfo) -> Result<RspDevice> {
        self.ensure_open()?;
        let variant = device
            .variant()
            .ok_or(Error::Status(ApiStatus::HwVerError))?;
        if self.config.disable_heartbeat {
            self.transport.disable_heartbeat().await?;
        }

        self.transport.lock_device_api().await?;
        let selected = self.transport.select_device(device).await;
        let unlocked = self.transport.unlock_device_api().await;
        let handle = selected?;
        if let Err(e) = unlocked {
            self.abandon(handle).await;
            return Err(e);
        }

        let params = match self.prepare(handle).await {
            Ok(params) => params,
            Err(e) => {
                self.abandon(handle).await;
                return Err(e);
            }
        };

        let mut info = device.clone();
        info.handle = Some(handle);
        info.tuners = params.tuners();
        info.duo_mode = params.mode();
        info.valid = true;
        info!(
            serial = %info.serial,
            %variant,
            mode = %params.mode(),
            tuners = ?info.tuners,
            "device selected"
        );

        let state = DeviceState {
            handle,
            variant,
            mode: params.mode(),
            params,
            info,
            generation: 0,
            staged: Default::default(),
            valid: true,
            initialised: false,
            slave_attached: false,
            last_error: None,
        };
        let shared = Shared::new(state);
        {
            let mut sessions = self.sessions();
            sessions.retain(|s| s.strong_count() > 0);
            sessions.push(Arc::downgrade(&shared));
        }
        let dispatcher = Dispatcher::new(self.transport.clone(), self.config.pending_policy);
        Ok(RspDevice::new(shared, self.transport.clone(), dispatcher))
    }

    async fn prepare(&self, handle: DeviceHandle) -> Result<DeviceParams> {
        if self.config.debug_level != DebugLevel::Disable {
            self.transport
                .debug_enable(handle, self.config.debug_level)
                .await?;
        }
        self.transport.get_device_params(handle).await
    }

    async fn abandon(&self, handle: DeviceHandle) {
        if let Err(e) = self.transport.release_device(handle).await {
            warn!(error = %e, "failed to release device after a failed selection");
        }
    }

    /// Human-readable text for a status code.
    pub fn error_string(status: ApiStatus) -> &'static str {
        status.error_string()
    }
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api")
            .field("config", &self.config)
            .field("open", &self.is_open())
            .field("sessions", &self.sessions().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rsplib_core::types::{ApiVersion, DeviceVariant, DuoMode, Tuner, TunerSelect};
    use rsplib_test_harness::{FakeOp, FakeTransport};

    fn api(fake: &Arc<FakeTransport>) -> Api {
        ApiBuilder::new().build(fake.clone())
    }

    #[tokio::test]
    async fn open_is_once_only() {
        let fake = Arc::new(FakeTransport::new());
        let api = api(&fake);
        assert_eq!(api.devices().await, Err(Error::NotInitialised));
        api.open().await.unwrap();
        assert_eq!(api.open().await, Err(Error::AlreadyInitialised));
        api.close().await.unwrap();
        assert_eq!(api.close().await, Err(Error::NotInitialised));
        assert!(!fake.is_open());
    }

    #[tokio::test]
    async fn version_outside_range_rejected() {
        let fake = Arc::new(FakeTransport::new());
        fake.set_api_version(Some(ApiVersion::new(2, 13)));
        let api = api(&fake);
        assert_eq!(
            api.open().await,
            Err(Error::Status(ApiStatus::InvalidServiceVersion))
        );
        assert!(!api.is_open());
        assert!(!fake.is_open());
    }

    #[tokio::test]
    async fn failed_open_can_be_retried() {
        let fake = Arc::new(FakeTransport::new());
        fake.fail_next(FakeOp::Open, ApiStatus::ServiceNotResponding);
        let api = api(&fake);
        assert!(api.open().await.is_err());
        api.open().await.unwrap();
    }

    #[tokio::test]
    async fn enumeration_is_capped() {
        let fake = Arc::new(
            FakeTransport::new()
                .with_device(FakeTransport::rsp1a("A1"))
                .with_device(FakeTransport::rsp1a("A2"))
                .with_device(FakeTransport::rsp1a("A3")),
        );
        let api = ApiBuilder::new().max_devices(2).build(fake.clone());
        api.open().await.unwrap();
        assert_eq!(api.devices().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn select_holds_api_lock_and_applies_config() {
        let fake = Arc::new(FakeTransport::new().with_device(FakeTransport::rsp1a("A1")));
        let api = ApiBuilder::new()
            .disable_heartbeat(true)
            .debug_level(DebugLevel::Verbose)
            .build(fake.clone());
        api.open().await.unwrap();
        let devices = api.devices().await.unwrap();
        let device = api.select(&devices[0]).await.unwrap();

        assert_eq!(fake.lock_count(), 1);
        assert!(!fake.api_locked());
        assert!(fake.heartbeat_disabled());
        let handle = device.info().handle.unwrap();
        assert_eq!(fake.debug_level(handle), Some(DebugLevel::Verbose));
        assert_eq!(device.variant(), DeviceVariant::Rsp1a);
        assert_eq!(device.tuners(), TunerSelect::A);
        assert!(device.is_valid());
    }

    #[tokio::test]
    async fn failed_select_releases_api_lock() {
        let fake = Arc::new(FakeTransport::new().with_device(FakeTransport::rsp1a("A1")));
        fake.fail_next(FakeOp::Select, ApiStatus::HwError);
        let api = api(&fake);
        api.open().await.unwrap();
        let devices = api.devices().await.unwrap();
        let err = api.select(&devices[0]).await.unwrap_err();
        assert_eq!(err, Error::Status(ApiStatus::HwError));
        assert!(!fake.api_locked());
    }

    #[tokio::test]
    async fn unknown_hardware_rejected() {
        let fake = Arc::new(FakeTransport::new());
        let api = api(&fake);
        api.open().await.unwrap();
        let mut info = FakeTransport::rsp1a("X1");
        info.hw_ver = 77;
        assert_eq!(
            api.select(&info).await.unwrap_err(),
            Error::Status(ApiStatus::HwVerError)
        );
    }

    #[tokio::test]
    async fn duo_selection_shapes_session() {
        let fake = Arc::new(FakeTransport::new().with_device(FakeTransport::rspduo("D1")));
        let api = api(&fake);
        api.open().await.unwrap();
        let mut request = api.devices().await.unwrap().remove(0);
        request.duo_mode = DuoMode::Dual;
        request.tuners = TunerSelect::Both;
        request.duo_sample_freq = 6_000_000.0;
        let device = api.select(&request).await.unwrap();
        assert_eq!(device.mode(), DuoMode::Dual);
        assert_eq!(device.tuners(), TunerSelect::Both);
    }

    #[tokio::test]
    async fn close_ends_selected_sessions() {
        let fake = Arc::new(FakeTransport::new().with_device(FakeTransport::rsp1a("A1")));
        let api = api(&fake);
        api.open().await.unwrap();
        let info = api.devices().await.unwrap().remove(0);
        let device = api.select(&info).await.unwrap();
        let params = device.params();

        api.close().await.unwrap();
        assert!(!device.is_valid());
        assert!(!params.is_current());
        assert_eq!(
            device.init(crate::CallbackRegistration::new()).await,
            Err(Error::NotInitialised)
        );
        assert_eq!(
            device.update(Tuner::A, rsplib_core::reason::ReasonSet::empty()).await,
            Err(Error::NotInitialised)
        );
    }

    #[test]
    fn error_strings() {
        assert_eq!(Api::error_string(ApiStatus::Success), "success");
        assert_eq!(
            Api::error_string(ApiStatus::InvalidServiceVersion),
            "invalid service version"
        );
    }
}
