//! Transport trait for receiver control.
//!
//! The [`Transport`] trait abstracts over the service that physically talks
//! to the receiver. A hardware backend wraps the vendor service; the fake
//! backend in `rsplib-test-harness` implements it in memory for
//! deterministic testing.
//!
//! Control calls flow down through [`Transport`]. Sample blocks and events
//! flow back up through the [`CallbackSink`] handed to [`Transport::init`],
//! on whatever context the backend's producer runs.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::events::DeviceEvent;
use crate::gain::GainValues;
use crate::params::DeviceParams;
use crate::reason::{Reason, ReasonSet};
use crate::stream::StreamBlock;
use crate::types::{
    AmPortSelect, ApiVersion, Bandwidth, DebugLevel, DeviceHandle, DeviceInfo, DuoMode, IfType,
    Tuner, TunerSelect,
};

/// Receiver of stream blocks and events from a running device.
///
/// Called from the transport's producer context. Implementations must not
/// block: `on_stream` in particular sits on the real-time sample path.
pub trait CallbackSink: Send + Sync {
    /// A block of samples for `tuner`'s channel.
    fn on_stream(&self, tuner: Tuner, block: &StreamBlock<'_>);

    /// A discrete device event.
    fn on_event(&self, event: DeviceEvent);
}

/// One update request: the reasons to apply on a tuner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateBatch {
    pub tuner: TunerSelect,
    pub reasons: ReasonSet,
}

impl UpdateBatch {
    pub fn new(tuner: Tuner, reasons: ReasonSet) -> Self {
        UpdateBatch {
            tuner: tuner.into(),
            reasons,
        }
    }

    /// The reasons in the order they must be applied.
    pub fn ordered(&self) -> impl Iterator<Item = Reason> + '_ {
        self.reasons.iter()
    }

    /// Raw primary-domain mask.
    pub fn primary(&self) -> u32 {
        self.reasons.primary()
    }

    /// Raw extension-1 mask.
    pub fn ext1(&self) -> u32 {
        self.reasons.ext1()
    }
}

/// What the hardware reported back from an update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    /// Gain values observed after the update, per affected tuner.
    pub gain_values: Vec<(Tuner, GainValues)>,
}

/// Parameters for a duo-mode swap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DuoModeSwap {
    pub target: DuoMode,
    pub sample_rate_hz: f64,
    pub tuner: Tuner,
    pub bandwidth: Bandwidth,
    pub if_type: IfType,
    pub am_port: AmPortSelect,
}

/// Asynchronous control channel to the receiver service.
///
/// All methods take `&self`; implementations synchronize internally so a
/// single transport can be shared between the control path and the
/// producer that feeds the [`CallbackSink`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the service connection.
    async fn open(&self) -> Result<()>;

    /// Close the service connection.
    async fn close(&self) -> Result<()>;

    /// The API version the service speaks.
    async fn api_version(&self) -> Result<ApiVersion>;

    /// Take the service-wide device lock around selection.
    async fn lock_device_api(&self) -> Result<()>;

    async fn unlock_device_api(&self) -> Result<()>;

    /// Enumerate up to `max` devices.
    async fn get_devices(&self, max: usize) -> Result<Vec<DeviceInfo>>;

    /// Stop the service from expecting keep-alives (debugging aid).
    async fn disable_heartbeat(&self) -> Result<()>;

    /// Take exclusive ownership of a device. For an RSPduo, `device` carries
    /// the requested tuners, duo mode and master sample rate.
    async fn select_device(&self, device: &DeviceInfo) -> Result<DeviceHandle>;

    async fn release_device(&self, handle: DeviceHandle) -> Result<()>;

    async fn debug_enable(&self, handle: DeviceHandle, level: DebugLevel) -> Result<()>;

    /// The device's current parameter tree.
    async fn get_device_params(&self, handle: DeviceHandle) -> Result<DeviceParams>;

    /// Start streaming; blocks and events go to `sink` until [`Transport::uninit`].
    async fn init(&self, handle: DeviceHandle, sink: Arc<dyn CallbackSink>) -> Result<()>;

    /// Stop streaming and drop the sink.
    async fn uninit(&self, handle: DeviceHandle) -> Result<()>;

    /// Apply the staged `params` for the reasons in `batch`.
    ///
    /// This is the synchronous hardware round trip and may take unbounded
    /// time while a stream start or stop is in progress.
    async fn update(
        &self,
        handle: DeviceHandle,
        batch: &UpdateBatch,
        params: &DeviceParams,
    ) -> Result<ApplyReport>;

    /// Move a single-tuner session to the other tuner.
    async fn swap_active_tuner(
        &self,
        handle: DeviceHandle,
        tuner: Tuner,
        am_port: AmPortSelect,
    ) -> Result<()>;

    /// Change the shared dual-tuner clock. Returns the previous rate.
    async fn swap_sample_rate(&self, handle: DeviceHandle, rate_hz: f64) -> Result<f64>;

    /// Change duo mode; returns the parameter tree for the new mode.
    async fn swap_duo_mode(&self, handle: DeviceHandle, swap: &DuoModeSwap)
    -> Result<DeviceParams>;
}
