//! A selected device and its control operations.
//!
//! [`RspDevice`] is returned by [`Api::select`](crate::Api::select). It is a
//! cheap, cloneable handle: every clone drives the same session. Control
//! operations are serialized per device; a second operation started while
//! one is in flight fails with [`Error::Reentrant`] instead of queueing.
//!
//! # Lifecycle
//!
//! ```text
//! select ──► init ──► update / commit / swap_* ──► uninit ──► release
//!                 ▲                                   │
//!                 └───────────────────────────────────┘
//! ```
//!
//! A terminal event (device removed, device failure, or loss of the master
//! for a slave session) ends the session; every later operation fails with
//! `NotInitialised`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use rsplib_core::error::{Error, ErrorInfo, Result};
use rsplib_core::reason::{Reason, ReasonSet};
use rsplib_core::transport::{DuoModeSwap, Transport};
use rsplib_core::types::{
    AmPortSelect, DebugLevel, DeviceHandle, DeviceInfo, DeviceVariant, DuoMode, Tuner, TunerSelect,
};

use crate::dispatcher::Dispatcher;
use crate::duo;
use crate::router::{CallbackRegistration, StreamStats, change};
use crate::state::{ParamsRef, SessionSink, Shared, Transition};

/// Handle to a selected device.
#[derive(Clone)]
pub struct RspDevice {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    dispatcher: Dispatcher,
}

impl RspDevice {
    pub(crate) fn new(
        shared: Arc<Shared>,
        transport: Arc<dyn Transport>,
        dispatcher: Dispatcher,
    ) -> Self {
        RspDevice {
            shared,
            transport,
            dispatcher,
        }
    }

    #[track_caller]
    fn record<T>(&self, function: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.shared.record_error(function, e);
        }
        result
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    /// Identity and current role of the device.
    pub fn info(&self) -> DeviceInfo {
        self.shared.lock().info.clone()
    }

    pub fn handle(&self) -> DeviceHandle {
        self.shared.lock().handle
    }

    pub fn variant(&self) -> DeviceVariant {
        self.shared.lock().variant
    }

    pub fn mode(&self) -> DuoMode {
        self.shared.lock().mode
    }

    /// Tuners this session owns.
    pub fn tuners(&self) -> TunerSelect {
        self.shared.lock().tuners()
    }

    /// `false` after release or a terminal event.
    pub fn is_valid(&self) -> bool {
        self.shared.lock().valid
    }

    /// `true` while stream delivery is running.
    pub fn is_initialised(&self) -> bool {
        self.shared.lock().initialised
    }

    /// Stream start or stop in progress.
    pub fn transition(&self) -> Transition {
        self.shared.transition()
    }

    /// `true` if a master session has a slave attached.
    pub fn slave_attached(&self) -> bool {
        self.shared.lock().slave_attached
    }

    /// A reference to the current parameter tree.
    pub fn params(&self) -> ParamsRef {
        let generation = self.shared.lock().generation;
        ParamsRef::new(self.shared.clone(), generation)
    }

    /// Details of the most recent failed operation on this device.
    pub fn last_error(&self) -> Option<ErrorInfo> {
        self.shared.lock().last_error.clone()
    }

    pub fn stream_stats(&self, tuner: Tuner) -> StreamStats {
        self.shared.streams.stats(tuner)
    }

    /// Events delivered to the registered handler so far.
    pub fn events_delivered(&self) -> u64 {
        self.shared.events.delivered()
    }

    // ---------------------------------------------------------------
    // Stream lifecycle
    // ---------------------------------------------------------------

    /// Start stream and event delivery to `callbacks`.
    pub async fn init(&self, callbacks: CallbackRegistration) -> Result<()> {
        let result = self.init_inner(callbacks).await;
        self.record("init", result)
    }

    async fn init_inner(&self, callbacks: CallbackRegistration) -> Result<()> {
        let gate = self.shared.try_gate()?;
        let handle = {
            let state = self.shared.lock();
            state.ensure_valid()?;
            if state.initialised {
                return Err(Error::AlreadyInitialised);
            }
            state.handle
        };

        for tuner in [Tuner::A, Tuner::B] {
            self.shared
                .streams
                .register(tuner, callbacks.stream[tuner.index()].clone());
        }
        self.shared.events.register(callbacks.event.clone());

        self.shared.set_transition(Transition::Starting);
        let sink = Arc::new(SessionSink {
            shared: self.shared.clone(),
        });
        let result = self.transport.init(handle, sink).await;
        match &result {
            Ok(()) => {
                let mut state = self.shared.lock();
                state.initialised = true;
                info!(serial = %state.info.serial, ?callbacks, "stream started");
            }
            Err(e) => {
                warn!(error = %e, "stream start failed");
                self.shared.streams.clear();
                self.shared.events.register(None);
            }
        }
        drop(gate);
        self.shared.set_transition(Transition::Idle);
        result
    }

    /// Stop stream and event delivery and drop the registered handlers.
    ///
    /// Waits for an in-flight update to finish first. After a terminal event
    /// the handlers are still dropped, and the call reports `NotInitialised`.
    pub async fn uninit(&self) -> Result<()> {
        let result = self.uninit_inner().await;
        self.record("uninit", result)
    }

    async fn uninit_inner(&self) -> Result<()> {
        let gate = self.shared.gate.lock().await;
        let handle = {
            let state = self.shared.lock();
            if !state.initialised {
                drop(state);
                self.shared.streams.clear();
                self.shared.events.register(None);
                return Err(Error::NotInitialised);
            }
            state.handle
        };

        self.shared.set_transition(Transition::Stopping);
        let result = self.transport.uninit(handle).await;
        if result.is_ok() {
            let mut state = self.shared.lock();
            state.initialised = false;
            info!(serial = %state.info.serial, "stream stopped");
        }
        self.shared.streams.clear();
        self.shared.events.register(None);
        drop(gate);
        self.shared.set_transition(Transition::Idle);
        result
    }

    /// Give up ownership of the device.
    ///
    /// Stops streaming first if needed. Every outstanding [`ParamsRef`] goes
    /// stale and later operations fail with `NotInitialised`.
    pub async fn release(&self) -> Result<()> {
        let result = self.release_inner().await;
        self.record("release", result)
    }

    async fn release_inner(&self) -> Result<()> {
        let _gate = self.shared.gate.lock().await;
        let (handle, streaming) = {
            let state = self.shared.lock();
            (state.handle, state.initialised)
        };
        if streaming {
            if let Err(e) = self.transport.uninit(handle).await {
                warn!(error = %e, "stream stop failed during release");
            }
        }
        self.shared.streams.clear();
        self.shared.events.register(None);

        let result = self.transport.release_device(handle).await;
        self.shared.invalidate();
        info!(serial = %self.shared.lock().info.serial, "device released");
        result
    }

    /// Set the service's debug output level for this device.
    pub async fn set_debug_level(&self, level: DebugLevel) -> Result<()> {
        let result = self.set_debug_level_inner(level).await;
        self.record("set_debug_level", result)
    }

    async fn set_debug_level_inner(&self, level: DebugLevel) -> Result<()> {
        let handle = {
            let state = self.shared.lock();
            state.ensure_valid()?;
            state.handle
        };
        self.transport.debug_enable(handle, level).await
    }

    // ---------------------------------------------------------------
    // Updates
    // ---------------------------------------------------------------

    /// Apply `reasons` on `tuner` from the current parameter tree.
    pub async fn update(&self, tuner: Tuner, reasons: ReasonSet) -> Result<()> {
        let result = self.dispatcher.dispatch(&self.shared, tuner, reasons).await;
        self.record("update", result)
    }

    /// Apply what is staged for `tuner` through [`ParamsRef::stage`].
    ///
    /// Sends `tuner`'s channel reasons plus any staged device reasons. The
    /// other tuner's channel reasons stay staged.
    pub async fn commit(&self, tuner: Tuner) -> Result<()> {
        let result = self.commit_inner(tuner).await;
        self.record("commit", result)
    }

    async fn commit_inner(&self, tuner: Tuner) -> Result<()> {
        let gate = self.dispatcher.acquire(&self.shared).await?;
        let staged = self.shared.lock().staged.for_tuner(tuner);
        self.dispatcher
            .dispatch_locked(&self.shared, tuner, staged)
            .await?;
        drop(gate);
        Ok(())
    }

    /// Apply `reasons` and wait until the stream reports the change.
    ///
    /// Gain, RF and sample-rate changes are confirmed by the matching flag
    /// on a later stream block for `tuner`. Other reasons return as soon as
    /// the update is applied.
    pub async fn update_confirmed(
        &self,
        tuner: Tuner,
        reasons: ReasonSet,
        timeout: Duration,
    ) -> Result<()> {
        let result = self.update_confirmed_inner(tuner, reasons, timeout).await;
        self.record("update_confirmed", result)
    }

    async fn update_confirmed_inner(
        &self,
        tuner: Tuner,
        reasons: ReasonSet,
        timeout: Duration,
    ) -> Result<()> {
        let mut mask = 0;
        if reasons.contains(Reason::TunerGr) {
            mask |= change::GAIN;
        }
        if reasons.contains(Reason::TunerFrf) {
            mask |= change::RF;
        }
        if reasons.contains(Reason::DevFs) {
            mask |= change::FS;
        }
        if mask == 0 {
            return self.dispatcher.dispatch(&self.shared, tuner, reasons).await;
        }

        let confirm = self.shared.streams.confirmation(tuner);
        let mut settled = std::pin::pin!(confirm.notify().notified());
        settled.as_mut().enable();
        confirm.arm(mask);

        if let Err(e) = self.dispatcher.dispatch(&self.shared, tuner, reasons).await {
            confirm.disarm();
            return Err(e);
        }
        if confirm.is_settled() {
            return Ok(());
        }
        let waited = tokio::time::timeout(timeout, settled).await;
        confirm.disarm();
        waited.map_err(|_| {
            debug!(%tuner, "update not confirmed by stream");
            Error::Timeout
        })
    }

    /// Acknowledge a power-overload event on `tuner`.
    ///
    /// A session that has already stopped needs no acknowledgement.
    pub async fn acknowledge_overload(&self, tuner: Tuner) -> Result<()> {
        let result = match self
            .dispatcher
            .dispatch(&self.shared, tuner, ReasonSet::from(Reason::CtrlOverloadMsgAck))
            .await
        {
            Err(Error::NotInitialised) => Ok(()),
            other => other,
        };
        self.record("acknowledge_overload", result)
    }

    // ---------------------------------------------------------------
    // Dual-tuner operations
    // ---------------------------------------------------------------

    /// Move a single-tuner RSPduo session to `tuner`.
    pub async fn swap_active_tuner(&self, tuner: Tuner, am_port: AmPortSelect) -> Result<()> {
        let result =
            duo::swap_active_tuner(&self.shared, self.transport.as_ref(), tuner, am_port).await;
        self.record("swap_active_tuner", result)
    }

    /// Move the shared dual-tuner clock. Returns the previous rate.
    pub async fn swap_sample_rate(&self, rate_hz: f64) -> Result<f64> {
        let result = duo::swap_sample_rate(&self.shared, self.transport.as_ref(), rate_hz).await;
        self.record("swap_sample_rate", result)
    }

    /// Change RSPduo mode. Outstanding [`ParamsRef`]s go stale.
    pub async fn swap_duo_mode(&self, swap: DuoModeSwap) -> Result<()> {
        let result = duo::swap_duo_mode(&self.shared, self.transport.as_ref(), &swap).await;
        self.record("swap_duo_mode", result)
    }
}

impl std::fmt::Debug for RspDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("RspDevice")
            .field("serial", &state.info.serial)
            .field("variant", &state.variant)
            .field("mode", &state.mode)
            .field("valid", &state.valid)
            .field("initialised", &state.initialised)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use rsplib_core::error::ApiStatus;
    use rsplib_core::events::{DeviceEvent, DuoModeChange, EventKind, PowerOverload};
    use rsplib_core::params::DUAL_TUNER_SAMPLE_RATES_HZ;
    use rsplib_core::reason::Field;
    use rsplib_core::stream::StreamBlock;
    use rsplib_core::types::{Bandwidth, IfType};
    use rsplib_test_harness::{FakeOp, FakeTransport};

    use crate::api::Api;
    use crate::builder::ApiBuilder;
    use crate::router::Sequence;

    async fn open(fake: &Arc<FakeTransport>) -> Api {
        let api = ApiBuilder::new().build(fake.clone());
        api.open().await.unwrap();
        api
    }

    async fn rsp1a() -> (Arc<FakeTransport>, RspDevice) {
        let fake = Arc::new(FakeTransport::new().with_device(FakeTransport::rsp1a("A1")));
        let api = open(&fake).await;
        let info = api.devices().await.unwrap().remove(0);
        let device = api.select(&info).await.unwrap();
        (fake, device)
    }

    fn duo_request(mode: DuoMode, tuners: TunerSelect) -> DeviceInfo {
        DeviceInfo {
            duo_mode: mode,
            tuners,
            duo_sample_freq: 6_000_000.0,
            ..FakeTransport::rspduo("D1")
        }
    }

    fn block(first: u32, xi: &[i16]) -> StreamBlock<'_> {
        StreamBlock::new(first, xi, xi)
    }

    #[tokio::test]
    async fn gain_update_reports_observed_gain() {
        let (fake, device) = rsp1a().await;
        device.init(CallbackRegistration::new()).await.unwrap();

        let params = device.params();
        let field = params.stage(|p| p.set_gain(Tuner::A, 40, 0)).unwrap();
        assert_eq!(field, Field::GainReduction);
        device.commit(Tuner::A).await.unwrap();

        assert_eq!(fake.applied()[0].reasons, vec![Reason::TunerGr]);
        let observed = params
            .read(|p| p.channel(Tuner::A).map(|c| c.tuner.gain.observed))
            .unwrap()
            .unwrap();
        assert_eq!(observed.map(|g| g.curr), Some(40.0));
        assert!(params.staged().unwrap().is_empty());
    }

    #[tokio::test]
    async fn gain_below_floor_fails_before_dispatch() {
        let (fake, device) = rsp1a().await;
        device.init(CallbackRegistration::new()).await.unwrap();
        let err = device
            .params()
            .stage(|p| p.set_gain(Tuner::A, 10, 0))
            .unwrap_err();
        assert_eq!(err.status(), ApiStatus::InvalidParam);
        device.commit(Tuner::A).await.unwrap();
        assert_eq!(fake.update_count(), 0);
    }

    #[tokio::test]
    async fn update_before_init_is_not_initialised() {
        let (_, device) = rsp1a().await;
        let err = device
            .update(Tuner::A, ReasonSet::from(Reason::TunerGr))
            .await
            .unwrap_err();
        assert_eq!(err, Error::NotInitialised);
        let info = device.last_error().unwrap();
        assert_eq!(info.function, "update");
        assert_eq!(info.message, "not initialised");
        assert!(info.file.ends_with("device.rs"));
    }

    #[tokio::test]
    async fn last_error_is_overwritten() {
        let (fake, device) = rsp1a().await;
        assert!(device.last_error().is_none());
        device.init(CallbackRegistration::new()).await.unwrap();
        fake.fail_next(FakeOp::Update, ApiStatus::RfUpdateError);
        let _ = device.update(Tuner::A, ReasonSet::from(Reason::TunerFrf)).await;
        assert_eq!(device.last_error().unwrap().function, "update");

        let _ = device.init(CallbackRegistration::new()).await;
        let info = device.last_error().unwrap();
        assert_eq!(info.function, "init");
        assert_eq!(info.message, "already initialised");
    }

    #[tokio::test]
    async fn device_removed_ends_session() {
        let (fake, device) = rsp1a().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let out = seen.clone();
        device
            .init(CallbackRegistration::new().event(move |ev: &DeviceEvent| {
                out.lock().unwrap().push(ev.kind.clone());
            }))
            .await
            .unwrap();

        let handle = device.handle();
        assert!(fake.emit_event(
            handle,
            DeviceEvent::new(TunerSelect::A, EventKind::DeviceRemoved)
        ));
        assert!(!device.is_valid());
        assert_eq!(*seen.lock().unwrap(), vec![EventKind::DeviceRemoved]);
        assert_eq!(
            device.update(Tuner::A, ReasonSet::from(Reason::TunerGr)).await,
            Err(Error::NotInitialised)
        );
        assert_eq!(fake.update_count(), 0);
    }

    #[tokio::test]
    async fn stream_blocks_routed_with_sequence() {
        let (fake, device) = rsp1a().await;
        let seen: Arc<Mutex<Vec<Sequence>>> = Arc::new(Mutex::new(Vec::new()));
        let out = seen.clone();
        device
            .init(CallbackRegistration::new().stream_a(
                move |_: &StreamBlock<'_>, seq: Sequence| out.lock().unwrap().push(seq),
            ))
            .await
            .unwrap();

        let samples = [0i16; 4];
        let handle = device.handle();
        assert!(fake.emit_stream(handle, Tuner::A, &block(0, &samples)));
        assert!(fake.emit_stream(handle, Tuner::A, &block(4, &samples)));
        assert!(fake.emit_stream(handle, Tuner::A, &block(100, &samples)));
        // No handler on B.
        assert!(fake.emit_stream(handle, Tuner::B, &block(0, &samples)));

        let seen = seen.lock().unwrap();
        let contiguous: Vec<bool> = seen.iter().map(|s| s.contiguous).collect();
        assert_eq!(contiguous, vec![false, true, false]);
        assert_eq!(device.stream_stats(Tuner::A).delivered, 3);
        assert_eq!(device.stream_stats(Tuner::B).dropped, 1);
    }

    #[tokio::test]
    async fn uninit_drops_handlers_and_stops() {
        let (fake, device) = rsp1a().await;
        device
            .init(CallbackRegistration::new().stream_a(|_: &StreamBlock<'_>, _: Sequence| {}))
            .await
            .unwrap();
        let handle = device.handle();
        assert!(fake.is_streaming(handle));
        device.uninit().await.unwrap();
        assert!(!fake.is_streaming(handle));
        assert!(!device.is_initialised());
        assert_eq!(device.uninit().await, Err(Error::NotInitialised));
        // Restartable.
        device.init(CallbackRegistration::new()).await.unwrap();
    }

    #[tokio::test]
    async fn uninit_waits_for_inflight_update() {
        let (fake, device) = rsp1a().await;
        device.init(CallbackRegistration::new()).await.unwrap();
        fake.set_delay(FakeOp::Update, Duration::from_millis(50));

        let updater = device.clone();
        let inflight = tokio::spawn(async move {
            updater
                .update(Tuner::A, ReasonSet::from(Reason::TunerFrf))
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        device.uninit().await.unwrap();
        inflight.await.unwrap().unwrap();
        assert_eq!(fake.update_count(), 1);
    }

    #[tokio::test]
    async fn failed_init_clears_handlers() {
        let (fake, device) = rsp1a().await;
        fake.fail_next(FakeOp::Init, ApiStatus::HwError);
        let err = device
            .init(CallbackRegistration::new().stream_a(|_: &StreamBlock<'_>, _: Sequence| {}))
            .await
            .unwrap_err();
        assert_eq!(err, Error::Status(ApiStatus::HwError));
        assert!(!device.is_initialised());
        assert_eq!(device.transition(), Transition::Idle);
    }

    #[tokio::test]
    async fn confirmed_update_waits_for_stream_flag() {
        let (fake, device) = rsp1a().await;
        device.init(CallbackRegistration::new()).await.unwrap();
        device
            .params()
            .stage(|p| p.set_gain(Tuner::A, 30, 0))
            .unwrap();

        let producer = fake.clone();
        let handle = device.handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let samples = [0i16; 8];
            let changed = StreamBlock {
                gr_changed: true,
                ..StreamBlock::new(0, &samples, &samples)
            };
            producer.emit_stream(handle, Tuner::A, &changed);
        });

        device
            .update_confirmed(
                Tuner::A,
                ReasonSet::from(Reason::TunerGr),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn confirmed_update_times_out_without_flag() {
        let (_, device) = rsp1a().await;
        device.init(CallbackRegistration::new()).await.unwrap();
        let err = device
            .update_confirmed(
                Tuner::A,
                ReasonSet::from(Reason::TunerFrf),
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();
        assert_eq!(err, Error::Timeout);
    }

    #[tokio::test]
    async fn overload_ack_after_stop_is_ok() {
        let (fake, device) = rsp1a().await;
        device.init(CallbackRegistration::new()).await.unwrap();
        fake.emit_event(
            device.handle(),
            DeviceEvent::new(
                TunerSelect::A,
                EventKind::PowerOverload(PowerOverload::Detected),
            ),
        );
        device.acknowledge_overload(Tuner::A).await.unwrap();
        assert_eq!(
            fake.applied()[0].reasons,
            vec![Reason::CtrlOverloadMsgAck]
        );

        device.uninit().await.unwrap();
        device.acknowledge_overload(Tuner::A).await.unwrap();
        assert_eq!(fake.update_count(), 1);
    }

    #[tokio::test]
    async fn release_invalidates_params() {
        let (_, device) = rsp1a().await;
        device.init(CallbackRegistration::new()).await.unwrap();
        let params = device.params();
        device.release().await.unwrap();
        assert!(!device.is_valid());
        assert!(!params.is_current());
        assert_eq!(
            params.stage(|p| p.set_ppm(2.0)),
            Err(Error::StaleParameters)
        );
        assert_eq!(
            device.init(CallbackRegistration::new()).await,
            Err(Error::NotInitialised)
        );
    }

    #[tokio::test]
    async fn uninit_after_device_removed_drops_handlers() {
        let (fake, device) = rsp1a().await;
        let seen = Arc::new(Mutex::new(0usize));
        let out = seen.clone();
        device
            .init(CallbackRegistration::new().stream_a(
                move |_: &StreamBlock<'_>, _: Sequence| *out.lock().unwrap() += 1,
            ))
            .await
            .unwrap();

        let handle = device.handle();
        fake.emit_event(handle, DeviceEvent::new(TunerSelect::A, EventKind::DeviceRemoved));
        assert_eq!(device.uninit().await, Err(Error::NotInitialised));

        let samples = [0i16; 4];
        fake.emit_stream(handle, Tuner::A, &block(0, &samples));
        assert_eq!(*seen.lock().unwrap(), 0);
        assert_eq!(device.stream_stats(Tuner::A).dropped, 1);
    }

    #[tokio::test]
    async fn debug_level_forwarded() {
        let (fake, device) = rsp1a().await;
        device.set_debug_level(DebugLevel::Message).await.unwrap();
        assert_eq!(fake.debug_level(device.handle()), Some(DebugLevel::Message));
    }

    // ---------------------------------------------------------------
    // RSPduo
    // ---------------------------------------------------------------

    async fn master_and_slave() -> (Arc<FakeTransport>, RspDevice, RspDevice) {
        let fake = Arc::new(FakeTransport::new().with_device(FakeTransport::rspduo("D1")));
        let api = open(&fake).await;
        let master = api
            .select(&duo_request(DuoMode::Master, TunerSelect::Both))
            .await
            .unwrap();
        master.init(CallbackRegistration::new()).await.unwrap();
        let slave = api
            .select(&duo_request(DuoMode::Slave, TunerSelect::B))
            .await
            .unwrap();
        slave.init(CallbackRegistration::new()).await.unwrap();
        (fake, master, slave)
    }

    #[tokio::test]
    async fn slave_cannot_change_sample_rate() {
        let (fake, _master, slave) = master_and_slave().await;
        assert_eq!(slave.tuners(), TunerSelect::B);
        let reasons = rsplib_core::reason::encode("dev.fs").unwrap();
        let err = slave.update(Tuner::B, reasons).await.unwrap_err();
        assert!(matches!(err, Error::ModeViolation { mode: DuoMode::Slave, .. }));
        assert_eq!(fake.update_count(), 0);
    }

    #[tokio::test]
    async fn refused_slave_stage_does_not_block_later_commits() {
        let (fake, _master, slave) = master_and_slave().await;
        let params = slave.params();
        let err = params
            .stage(|p| p.set_sample_rate(8_000_000.0))
            .unwrap_err();
        assert!(matches!(err, Error::ModeViolation { mode: DuoMode::Slave, .. }));
        assert_eq!(params.read(|p| p.dev().sample_rate_hz).unwrap(), 6_000_000.0);

        params.stage(|p| p.set_gain(Tuner::B, 40, 0)).unwrap();
        slave.commit(Tuner::B).await.unwrap();
        let applied = fake.applied();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].tuner, TunerSelect::B);
        assert_eq!(applied[0].reasons, vec![Reason::TunerGr]);
    }

    #[tokio::test]
    async fn dual_commit_sends_only_its_tuner() {
        let fake = Arc::new(FakeTransport::new().with_device(FakeTransport::rspduo("D1")));
        let api = open(&fake).await;
        let device = api
            .select(&duo_request(DuoMode::Dual, TunerSelect::Both))
            .await
            .unwrap();
        device.init(CallbackRegistration::new()).await.unwrap();

        let params = device.params();
        params.stage(|p| p.set_gain(Tuner::A, 40, 0)).unwrap();
        params.stage(|p| p.set_rf_frequency(Tuner::B, 100e6)).unwrap();

        device.commit(Tuner::A).await.unwrap();
        assert_eq!(fake.applied()[0].tuner, TunerSelect::A);
        assert_eq!(fake.applied()[0].reasons, vec![Reason::TunerGr]);
        assert_eq!(
            params.staged_for(Tuner::B).unwrap(),
            ReasonSet::from(Reason::TunerFrf)
        );

        device.commit(Tuner::B).await.unwrap();
        assert_eq!(fake.applied()[1].tuner, TunerSelect::B);
        assert_eq!(fake.applied()[1].reasons, vec![Reason::TunerFrf]);
        assert!(params.staged().unwrap().is_empty());
    }

    #[tokio::test]
    async fn updates_during_mode_swap_are_stop_pending() {
        let fake = Arc::new(FakeTransport::new().with_device(FakeTransport::rspduo("D1")));
        let api = open(&fake).await;
        let device = api
            .select(&duo_request(DuoMode::Dual, TunerSelect::Both))
            .await
            .unwrap();
        device.init(CallbackRegistration::new()).await.unwrap();
        device
            .params()
            .stage(|p| p.set_gain(Tuner::A, 40, 0))
            .unwrap();
        fake.set_delay(FakeOp::SwapDuoMode, Duration::from_millis(100));

        let swapper = device.clone();
        let swap = tokio::spawn(async move {
            swapper
                .swap_duo_mode(DuoModeSwap {
                    target: DuoMode::Single,
                    sample_rate_hz: 2_000_000.0,
                    tuner: Tuner::A,
                    bandwidth: Bandwidth::Bw200kHz,
                    if_type: IfType::Zero,
                    am_port: AmPortSelect::Port2,
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(device.transition(), Transition::Stopping);
        assert_eq!(
            device.update(Tuner::A, ReasonSet::from(Reason::TunerGr)).await,
            Err(Error::StopPending)
        );
        assert_eq!(device.commit(Tuner::A).await, Err(Error::StopPending));

        swap.await.unwrap().unwrap();
        assert_eq!(device.transition(), Transition::Idle);
        assert_eq!(device.mode(), DuoMode::Single);
        assert_eq!(fake.update_count(), 0);
    }

    #[tokio::test]
    async fn master_tracks_slave_and_refuses_mode_swap() {
        let (fake, master, slave) = master_and_slave().await;
        assert!(master.slave_attached());
        let swap = DuoModeSwap {
            target: DuoMode::Single,
            sample_rate_hz: 2_000_000.0,
            tuner: Tuner::A,
            bandwidth: Bandwidth::Bw200kHz,
            if_type: IfType::Zero,
            am_port: AmPortSelect::Port2,
        };
        assert!(matches!(
            master.swap_duo_mode(swap).await,
            Err(Error::ModeViolation { mode: DuoMode::Master, .. })
        ));

        slave.release().await.unwrap();
        assert!(!master.slave_attached());
        let params = master.params();
        master.swap_duo_mode(swap).await.unwrap();
        assert_eq!(master.mode(), DuoMode::Single);
        assert_eq!(master.tuners(), TunerSelect::A);
        assert!(!params.is_current());
        assert_eq!(fake.device_params(master.handle()).unwrap().mode(), DuoMode::Single);
        assert!(master.params().is_current());
    }

    #[tokio::test]
    async fn master_dll_loss_ends_slave() {
        let (fake, master, slave) = master_and_slave().await;
        fake.emit_event(
            slave.handle(),
            DeviceEvent::new(
                TunerSelect::B,
                EventKind::DuoModeChange(DuoModeChange::MasterDllDisappeared),
            ),
        );
        assert!(!slave.is_valid());
        assert!(master.is_valid());
    }

    #[tokio::test]
    async fn sample_rate_swap_moves_both_channels() {
        let fake = Arc::new(FakeTransport::new().with_device(FakeTransport::rspduo("D1")));
        let api = open(&fake).await;
        let device = api
            .select(&duo_request(DuoMode::Dual, TunerSelect::Both))
            .await
            .unwrap();
        let old = device
            .swap_sample_rate(DUAL_TUNER_SAMPLE_RATES_HZ[1])
            .await
            .unwrap();
        assert_eq!(old, 6_000_000.0);
        let params = device.params().snapshot().unwrap();
        assert_eq!(params.dev().sample_rate_hz, 8_000_000.0);
        for tuner in [Tuner::A, Tuner::B] {
            assert_eq!(
                params.channel(tuner).unwrap().tuner.if_type,
                IfType::If2048kHz
            );
        }
        assert!(matches!(
            device.swap_sample_rate(7_000_000.0).await,
            Err(Error::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn failed_rate_swap_keeps_old_rate() {
        let fake = Arc::new(FakeTransport::new().with_device(FakeTransport::rspduo("D1")));
        let api = open(&fake).await;
        let device = api
            .select(&duo_request(DuoMode::Dual, TunerSelect::Both))
            .await
            .unwrap();
        fake.fail_next(FakeOp::SwapSampleRate, ApiStatus::FsUpdateError);
        assert!(device.swap_sample_rate(8_000_000.0).await.is_err());
        let rate = device.params().read(|p| p.dev().sample_rate_hz).unwrap();
        assert_eq!(rate, 6_000_000.0);
    }

    #[tokio::test]
    async fn active_tuner_swap_single_mode_only() {
        let fake = Arc::new(FakeTransport::new().with_device(FakeTransport::rspduo("D1")));
        let api = open(&fake).await;
        let device = api
            .select(&duo_request(DuoMode::Single, TunerSelect::A))
            .await
            .unwrap();
        assert_eq!(
            device.swap_active_tuner(Tuner::B, AmPortSelect::Port1).await,
            Err(Error::InvalidParameter("tuner B has no HiZ port".into()))
        );
        device
            .swap_active_tuner(Tuner::B, AmPortSelect::Port2)
            .await
            .unwrap();
        assert_eq!(device.tuners(), TunerSelect::B);
        assert!(device.params().read(|p| p.has_channel(Tuner::B)).unwrap());

        let rsp1a_only = Arc::new(FakeTransport::new().with_device(FakeTransport::rsp1a("A1")));
        let other = open(&rsp1a_only).await;
        let info = other.devices().await.unwrap().remove(0);
        let single = other.select(&info).await.unwrap();
        assert!(matches!(
            single.swap_active_tuner(Tuner::B, AmPortSelect::Port2).await,
            Err(Error::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn active_tuner_swap_drops_staged_changes() {
        let fake = Arc::new(FakeTransport::new().with_device(FakeTransport::rspduo("D1")));
        let api = open(&fake).await;
        let device = api
            .select(&duo_request(DuoMode::Single, TunerSelect::A))
            .await
            .unwrap();
        device
            .params()
            .stage(|p| p.set_gain(Tuner::A, 40, 0))
            .unwrap();
        device
            .swap_active_tuner(Tuner::B, AmPortSelect::Port2)
            .await
            .unwrap();
        assert!(device.params().staged().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dual_mode_cannot_swap_tuner() {
        let fake = Arc::new(FakeTransport::new().with_device(FakeTransport::rspduo("D1")));
        let api = open(&fake).await;
        let device = api
            .select(&duo_request(DuoMode::Dual, TunerSelect::Both))
            .await
            .unwrap();
        assert!(matches!(
            device.swap_active_tuner(Tuner::B, AmPortSelect::Port2).await,
            Err(Error::ModeViolation { mode: DuoMode::Dual, .. })
        ));
    }
}
