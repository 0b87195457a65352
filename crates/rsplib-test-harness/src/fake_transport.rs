//! Fake transport for deterministic testing of session logic.
//!
//! [`FakeTransport`] implements the [`Transport`] trait entirely in memory.
//! It enumerates a configurable device list, records every update it is
//! asked to apply (with the reasons in the order received), and lets tests
//! script failures and delays per operation. Once a session is initialised
//! the test can push stream blocks and events through the registered sink
//! with [`FakeTransport::emit_stream`] and [`FakeTransport::emit_event`].
//!
//! Like the real service, the fake reports slave attach/detach to a
//! streaming master session on the same RSPduo.
//!
//! # Example
//!
//! ```
//! use rsplib_core::ApiStatus;
//! use rsplib_test_harness::{FakeOp, FakeTransport};
//!
//! let fake = FakeTransport::new().with_device(FakeTransport::rsp1a("1234567890"));
//! // The next update fails with a gain update error.
//! fake.fail_next(FakeOp::Update, ApiStatus::GainUpdateError);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use rsplib_core::error::{ApiStatus, Error, Result};
use rsplib_core::events::{DeviceEvent, DuoModeChange, EventKind};
use rsplib_core::gain::GainValues;
use rsplib_core::params::DeviceParams;
use rsplib_core::reason::Reason;
use rsplib_core::stream::StreamBlock;
use rsplib_core::transport::{ApplyReport, CallbackSink, DuoModeSwap, Transport, UpdateBatch};
use rsplib_core::types::{
    AmPortSelect, ApiVersion, DebugLevel, DeviceHandle, DeviceInfo, DeviceVariant, DuoMode,
    Tuner, TunerSelect,
};

/// Transport operations that can be scripted to fail or stall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    Open,
    Select,
    Release,
    Init,
    Uninit,
    Update,
    SwapActiveTuner,
    SwapSampleRate,
    SwapDuoMode,
}

/// One update the fake was asked to apply.
#[derive(Debug, Clone)]
pub struct AppliedUpdate {
    pub handle: DeviceHandle,
    pub tuner: TunerSelect,
    /// Reasons in the order the batch presented them.
    pub reasons: Vec<Reason>,
    pub primary: u32,
    pub ext1: u32,
    /// The parameter tree the update was applied from.
    pub params: DeviceParams,
}

struct Selection {
    info: DeviceInfo,
    variant: DeviceVariant,
    params: DeviceParams,
    sink: Option<Arc<dyn CallbackSink>>,
    debug_level: DebugLevel,
}

#[derive(Default)]
struct FakeState {
    open: bool,
    version: Option<ApiVersion>,
    devices: Vec<DeviceInfo>,
    selections: HashMap<DeviceHandle, Selection>,
    next_handle: u64,
    api_locked: bool,
    lock_count: usize,
    heartbeat_disabled: bool,
    applied: Vec<AppliedUpdate>,
    failures: HashMap<FakeOp, VecDeque<ApiStatus>>,
    delays: HashMap<FakeOp, Duration>,
}

/// An in-memory [`Transport`] for tests.
pub struct FakeTransport {
    state: Mutex<FakeState>,
}

impl FakeTransport {
    /// A fake speaking API version 3.08 with no devices attached.
    pub fn new() -> Self {
        FakeTransport {
            state: Mutex::new(FakeState {
                version: Some(ApiVersion::new(3, 8)),
                next_handle: 1,
                ..FakeState::default()
            }),
        }
    }

    /// Enumeration entry for a single-tuner device.
    pub fn device(serial: &str, variant: DeviceVariant) -> DeviceInfo {
        DeviceInfo {
            serial: serial.to_string(),
            hw_ver: variant.hw_ver(),
            tuners: TunerSelect::A,
            duo_mode: DuoMode::Unknown,
            duo_sample_freq: 0.0,
            valid: true,
            handle: None,
        }
    }

    pub fn rsp1a(serial: &str) -> DeviceInfo {
        Self::device(serial, DeviceVariant::Rsp1a)
    }

    /// Enumeration entry for an idle RSPduo, offering every mode.
    pub fn rspduo(serial: &str) -> DeviceInfo {
        DeviceInfo {
            tuners: TunerSelect::Both,
            duo_mode: DuoMode::Single,
            ..Self::device(serial, DeviceVariant::RspDuo)
        }
    }

    /// Add a device to the enumeration list.
    pub fn with_device(self, info: DeviceInfo) -> Self {
        self.lock().devices.push(info);
        self
    }

    /// Report `version` from `api_version()`, or fail it with `None`.
    pub fn set_api_version(&self, version: Option<ApiVersion>) {
        self.lock().version = version;
    }

    /// Fail the next call of `op` with `status`. Queued per operation.
    pub fn fail_next(&self, op: FakeOp, status: ApiStatus) {
        self.lock().failures.entry(op).or_default().push_back(status);
    }

    /// Stall every call of `op` for `delay` before it completes.
    pub fn set_delay(&self, op: FakeOp, delay: Duration) {
        self.lock().delays.insert(op, delay);
    }

    /// Every update applied so far, oldest first.
    pub fn applied(&self) -> Vec<AppliedUpdate> {
        self.lock().applied.clone()
    }

    pub fn update_count(&self) -> usize {
        self.lock().applied.len()
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// `true` while the device API lock is held.
    pub fn api_locked(&self) -> bool {
        self.lock().api_locked
    }

    /// How many times the device API lock has been taken.
    pub fn lock_count(&self) -> usize {
        self.lock().lock_count
    }

    pub fn heartbeat_disabled(&self) -> bool {
        self.lock().heartbeat_disabled
    }

    pub fn debug_level(&self, handle: DeviceHandle) -> Option<DebugLevel> {
        self.lock().selections.get(&handle).map(|s| s.debug_level)
    }

    /// `true` if `handle` has a registered sink.
    pub fn is_streaming(&self, handle: DeviceHandle) -> bool {
        self.lock()
            .selections
            .get(&handle)
            .is_some_and(|s| s.sink.is_some())
    }

    /// The parameter tree the fake holds for `handle`.
    pub fn device_params(&self, handle: DeviceHandle) -> Option<DeviceParams> {
        self.lock().selections.get(&handle).map(|s| s.params.clone())
    }

    /// Push a sample block to `handle`'s sink, as the producer would.
    ///
    /// Returns `false` if the session is not streaming.
    pub fn emit_stream(&self, handle: DeviceHandle, tuner: Tuner, block: &StreamBlock<'_>) -> bool {
        match self.sink(handle) {
            Some(sink) => {
                sink.on_stream(tuner, block);
                true
            }
            None => false,
        }
    }

    /// Push an event to `handle`'s sink, as the producer would.
    pub fn emit_event(&self, handle: DeviceHandle, event: DeviceEvent) -> bool {
        match self.sink(handle) {
            Some(sink) => {
                sink.on_event(event);
                true
            }
            None => false,
        }
    }

    fn sink(&self, handle: DeviceHandle) -> Option<Arc<dyn CallbackSink>> {
        self.lock()
            .selections
            .get(&handle)
            .and_then(|s| s.sink.clone())
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Apply the scripted delay and failure for `op`.
    async fn script(&self, op: FakeOp) -> Result<()> {
        let delay = self.lock().delays.get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self
            .lock()
            .failures
            .get_mut(&op)
            .and_then(|q| q.pop_front());
        match failure {
            Some(status) => {
                debug!(?op, %status, "scripted failure");
                Error::check(status)
            }
            None => Ok(()),
        }
    }

    fn selection<'a>(state: &'a mut FakeState, handle: DeviceHandle) -> Result<&'a mut Selection> {
        state
            .selections
            .get_mut(&handle)
            .ok_or(Error::Status(ApiStatus::InvalidParam))
    }

    /// The streaming master sink on the RSPduo `serial`, if any.
    fn master_sink(state: &FakeState, serial: &str) -> Option<Arc<dyn CallbackSink>> {
        state
            .selections
            .values()
            .find(|s| s.info.serial == serial && s.info.duo_mode == DuoMode::Master)
            .and_then(|s| s.sink.clone())
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn duo_event(change: DuoModeChange) -> DeviceEvent {
    DeviceEvent::new(TunerSelect::B, EventKind::DuoModeChange(change))
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self) -> Result<()> {
        self.script(FakeOp::Open).await?;
        self.lock().open = true;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.lock();
        state.open = false;
        state.selections.clear();
        Ok(())
    }

    async fn api_version(&self) -> Result<ApiVersion> {
        self.lock()
            .version
            .ok_or(Error::Status(ApiStatus::ServiceNotResponding))
    }

    async fn lock_device_api(&self) -> Result<()> {
        let mut state = self.lock();
        state.api_locked = true;
        state.lock_count += 1;
        Ok(())
    }

    async fn unlock_device_api(&self) -> Result<()> {
        self.lock().api_locked = false;
        Ok(())
    }

    async fn get_devices(&self, max: usize) -> Result<Vec<DeviceInfo>> {
        let state = self.lock();
        if !state.open {
            return Err(Error::NotInitialised);
        }
        Ok(state.devices.iter().take(max).cloned().collect())
    }

    async fn disable_heartbeat(&self) -> Result<()> {
        self.lock().heartbeat_disabled = true;
        Ok(())
    }

    async fn select_device(&self, device: &DeviceInfo) -> Result<DeviceHandle> {
        self.script(FakeOp::Select).await?;
        let (handle, notify) = {
            let mut state = self.lock();
            let variant = device
                .variant()
                .ok_or(Error::Status(ApiStatus::HwVerError))?;
            if !state.devices.iter().any(|d| d.serial == device.serial) {
                return Err(Error::Status(ApiStatus::InvalidParam));
            }
            let taken = state.selections.values().any(|s| s.info.serial == device.serial);
            let notify = if device.duo_mode == DuoMode::Slave {
                if !state
                    .selections
                    .values()
                    .any(|s| s.info.serial == device.serial && s.info.duo_mode == DuoMode::Master)
                {
                    return Err(Error::Status(ApiStatus::InvalidMode));
                }
                Self::master_sink(&state, &device.serial)
            } else {
                if taken {
                    return Err(Error::Status(ApiStatus::Fail));
                }
                None
            };

            let handle = DeviceHandle(state.next_handle);
            state.next_handle += 1;
            let mut info = device.clone();
            info.handle = Some(handle);
            let params = DeviceParams::defaults(
                variant,
                info.duo_mode,
                info.tuners,
                info.duo_sample_freq,
            );
            state.selections.insert(
                handle,
                Selection {
                    info,
                    variant,
                    params,
                    sink: None,
                    debug_level: DebugLevel::Disable,
                },
            );
            (handle, notify)
        };
        if let Some(master) = notify {
            master.on_event(duo_event(DuoModeChange::SlaveAttached));
        }
        Ok(handle)
    }

    async fn release_device(&self, handle: DeviceHandle) -> Result<()> {
        self.script(FakeOp::Release).await?;
        let notify = {
            let mut state = self.lock();
            let released = state
                .selections
                .remove(&handle)
                .ok_or(Error::Status(ApiStatus::InvalidParam))?;
            if released.info.duo_mode == DuoMode::Slave {
                Self::master_sink(&state, &released.info.serial)
            } else {
                None
            }
        };
        if let Some(master) = notify {
            master.on_event(duo_event(DuoModeChange::SlaveDetached));
        }
        Ok(())
    }

    async fn debug_enable(&self, handle: DeviceHandle, level: DebugLevel) -> Result<()> {
        let mut state = self.lock();
        Self::selection(&mut state, handle)?.debug_level = level;
        Ok(())
    }

    async fn get_device_params(&self, handle: DeviceHandle) -> Result<DeviceParams> {
        let mut state = self.lock();
        Ok(Self::selection(&mut state, handle)?.params.clone())
    }

    async fn init(&self, handle: DeviceHandle, sink: Arc<dyn CallbackSink>) -> Result<()> {
        self.script(FakeOp::Init).await?;
        let mut state = self.lock();
        let selection = Self::selection(&mut state, handle)?;
        if selection.sink.is_some() {
            return Err(Error::AlreadyInitialised);
        }
        selection.sink = Some(sink);
        Ok(())
    }

    async fn uninit(&self, handle: DeviceHandle) -> Result<()> {
        self.script(FakeOp::Uninit).await?;
        let mut state = self.lock();
        let selection = Self::selection(&mut state, handle)?;
        if selection.sink.take().is_none() {
            return Err(Error::NotInitialised);
        }
        Ok(())
    }

    /// Records the batch and reports the requested gain as observed.
    ///
    /// Handles unknown to the fake are accepted, so session logic can be
    /// unit tested without a selection.
    async fn update(
        &self,
        handle: DeviceHandle,
        batch: &UpdateBatch,
        params: &DeviceParams,
    ) -> Result<ApplyReport> {
        self.script(FakeOp::Update).await?;
        let mut state = self.lock();
        state.applied.push(AppliedUpdate {
            handle,
            tuner: batch.tuner,
            reasons: batch.ordered().collect(),
            primary: batch.primary(),
            ext1: batch.ext1(),
            params: params.clone(),
        });
        if let Some(selection) = state.selections.get_mut(&handle) {
            selection.params = params.clone();
        }

        let mut report = ApplyReport::default();
        if batch.reasons.contains(Reason::TunerGr) {
            for tuner in batch.tuner.tuners() {
                if let Ok(channel) = params.channel(tuner) {
                    let gain = &channel.tuner.gain;
                    report.gain_values.push((
                        tuner,
                        GainValues {
                            curr: f32::from(gain.gr_db) + f32::from(gain.lna_state),
                            max: 59.0,
                            min: f32::from(gain.min_gr.floor_db()),
                        },
                    ));
                }
            }
        }
        Ok(report)
    }

    async fn swap_active_tuner(
        &self,
        handle: DeviceHandle,
        tuner: Tuner,
        _am_port: AmPortSelect,
    ) -> Result<()> {
        self.script(FakeOp::SwapActiveTuner).await?;
        let mut state = self.lock();
        let selection = Self::selection(&mut state, handle)?;
        selection.info.tuners = tuner.into();
        selection.params = DeviceParams::defaults(
            selection.variant,
            selection.info.duo_mode,
            tuner.into(),
            selection.info.duo_sample_freq,
        );
        Ok(())
    }

    async fn swap_sample_rate(&self, handle: DeviceHandle, rate_hz: f64) -> Result<f64> {
        self.script(FakeOp::SwapSampleRate).await?;
        let mut state = self.lock();
        let selection = Self::selection(&mut state, handle)?;
        let old = selection.params.dev().sample_rate_hz;
        selection.params.set_dual_tuner_rate(rate_hz)?;
        selection.info.duo_sample_freq = rate_hz;
        Ok(old)
    }

    async fn swap_duo_mode(
        &self,
        handle: DeviceHandle,
        swap: &DuoModeSwap,
    ) -> Result<DeviceParams> {
        self.script(FakeOp::SwapDuoMode).await?;
        let mut state = self.lock();
        let selection = Self::selection(&mut state, handle)?;
        let tuners = match swap.target {
            DuoMode::Single => swap.tuner.into(),
            _ => TunerSelect::Both,
        };
        selection.info.duo_mode = swap.target;
        selection.info.tuners = tuners;
        selection.info.duo_sample_freq = swap.sample_rate_hz;
        selection.params = DeviceParams::defaults(
            selection.variant,
            swap.target,
            tuners,
            swap.sample_rate_hz,
        );
        Ok(selection.params.clone())
    }
}
