//! Shared per-device session state.
//!
//! The control path and the transport's producer both touch a device's
//! state. Everything here is split so neither side can stall the other:
//!
//! - `state` is a plain mutex guarding [`DeviceState`]. It is only ever held
//!   for short, non-async critical sections (never across an `.await`).
//! - `gate` serializes control operations. It is taken with `try_lock` by
//!   dispatches, so a concurrent dispatch fails fast instead of queueing.
//! - `transition` publishes stream start/stop progress for callers that
//!   choose to wait it out.
//! - `streams` / `events` are the callback routers.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{debug, error, warn};

use rsplib_core::error::{Error, ErrorInfo, Result};
use rsplib_core::events::{DeviceEvent, DuoModeChange, EventKind};
use rsplib_core::params::DeviceParams;
use rsplib_core::reason::{Field, FieldScope, ReasonSet};
use rsplib_core::stream::StreamBlock;
use rsplib_core::transport::CallbackSink;
use rsplib_core::types::{DeviceHandle, DeviceInfo, DeviceVariant, DuoMode, Tuner, TunerSelect};

use crate::router::{EventRouter, StreamRouter};

/// Stream lifecycle transition in progress on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transition {
    #[default]
    Idle,
    Starting,
    Stopping,
}

impl Transition {
    /// The error a fail-fast caller sees during this transition.
    pub(crate) fn pending_error(self) -> Option<Error> {
        match self {
            Transition::Idle => None,
            Transition::Starting => Some(Error::StartPending),
            Transition::Stopping => Some(Error::StopPending),
        }
    }
}

/// Staged reasons, split by where they apply.
///
/// Device-block reasons go out with the next commit on any tuner; channel
/// reasons only with a commit on their own tuner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Staged {
    pub device: ReasonSet,
    pub channel: [ReasonSet; 2],
}

impl Staged {
    /// What a commit on `tuner` sends.
    pub(crate) fn for_tuner(&self, tuner: Tuner) -> ReasonSet {
        self.device | self.channel[tuner.index()]
    }

    pub(crate) fn all(&self) -> ReasonSet {
        self.device | self.channel[0] | self.channel[1]
    }

    /// Drop reasons applied on `tuner`.
    pub(crate) fn retire(&mut self, tuner: Tuner, applied: ReasonSet) {
        self.device = self.device.difference(applied);
        let channel = &mut self.channel[tuner.index()];
        *channel = channel.difference(applied);
    }

    /// Drop `reasons` wherever they are staged.
    pub(crate) fn discard(&mut self, reasons: ReasonSet) {
        self.device = self.device.difference(reasons);
        for channel in &mut self.channel {
            *channel = channel.difference(reasons);
        }
    }
}

/// Mutable state of one selected device.
#[derive(Debug)]
pub(crate) struct DeviceState {
    pub info: DeviceInfo,
    pub handle: DeviceHandle,
    pub variant: DeviceVariant,
    pub mode: DuoMode,
    pub params: DeviceParams,
    /// Bumped whenever `params` is replaced wholesale or released.
    pub generation: u64,
    /// Reasons staged through [`ParamsRef::stage`] and not yet applied.
    pub staged: Staged,
    /// Cleared on release and on terminal events.
    pub valid: bool,
    /// Stream delivery running.
    pub initialised: bool,
    /// A master session knows whether a slave is attached.
    pub slave_attached: bool,
    pub last_error: Option<ErrorInfo>,
}

impl DeviceState {
    pub(crate) fn tuners(&self) -> TunerSelect {
        self.params.tuners()
    }

    /// Fail unless the device is valid and streaming.
    pub(crate) fn ensure_running(&self) -> Result<()> {
        if self.valid && self.initialised {
            Ok(())
        } else {
            Err(Error::NotInitialised)
        }
    }

    pub(crate) fn ensure_valid(&self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(Error::NotInitialised)
        }
    }

    /// Reflect a device event into mode and validity state.
    fn apply_event(&mut self, event: &DeviceEvent) {
        if event.is_terminal(self.mode) {
            warn!(
                serial = %self.info.serial,
                kind = ?event.kind,
                "device session terminated"
            );
            self.valid = false;
            self.initialised = false;
            return;
        }
        match &event.kind {
            EventKind::DuoModeChange(change) => match change {
                DuoModeChange::SlaveAttached | DuoModeChange::SlaveInitialised => {
                    self.slave_attached = true;
                }
                DuoModeChange::SlaveDetached | DuoModeChange::SlaveDllDisappeared => {
                    self.slave_attached = false;
                }
                DuoModeChange::SlaveUninitialised
                | DuoModeChange::MasterInitialised
                | DuoModeChange::MasterDllDisappeared => {}
            },
            EventKind::GainChange { curr_gain, .. } => {
                for tuner in event.tuner.tuners() {
                    let observed = self
                        .params
                        .channel(tuner)
                        .ok()
                        .and_then(|c| c.tuner.gain.observed);
                    if let Some(mut values) = observed {
                        values.curr = *curr_gain as f32;
                        let _ = self.params.record_gain_values(tuner, values);
                    }
                }
            }
            EventKind::PowerOverload(_) | EventKind::DeviceRemoved | EventKind::DeviceFailure => {}
        }
    }
}

/// State shared between a device handle, its parameter references and the
/// producer-side callback sink.
pub(crate) struct Shared {
    state: Mutex<DeviceState>,
    pub gate: tokio::sync::Mutex<()>,
    pub transition: watch::Sender<Transition>,
    pub streams: StreamRouter,
    pub events: EventRouter,
}

impl Shared {
    pub(crate) fn new(state: DeviceState) -> Arc<Self> {
        let (transition, _) = watch::channel(Transition::Idle);
        Arc::new(Shared {
            state: Mutex::new(state),
            gate: tokio::sync::Mutex::new(()),
            transition,
            streams: StreamRouter::new(),
            events: EventRouter::new(),
        })
    }

    /// Lock the device state. Never hold the guard across an `.await`.
    pub(crate) fn lock(&self) -> MutexGuard<'_, DeviceState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Take the control gate without waiting.
    ///
    /// Fails with the pending error while a transition holds it, otherwise
    /// with `Reentrant`.
    pub(crate) fn try_gate(&self) -> Result<tokio::sync::MutexGuard<'_, ()>> {
        self.gate.try_lock().map_err(|_| match self.transition().pending_error() {
            Some(pending) => pending,
            None => {
                error!("control operation issued while another is in flight");
                Error::Reentrant
            }
        })
    }

    pub(crate) fn set_transition(&self, t: Transition) {
        self.transition.send_replace(t);
    }

    pub(crate) fn transition(&self) -> Transition {
        *self.transition.borrow()
    }

    /// End the session. Later operations fail with `NotInitialised` and
    /// every outstanding [`ParamsRef`] goes stale.
    pub(crate) fn invalidate(&self) {
        {
            let mut state = self.lock();
            state.valid = false;
            state.initialised = false;
            state.info.valid = false;
            state.generation += 1;
            state.staged = Staged::default();
        }
        self.streams.clear();
        self.events.register(None);
    }

    /// Record `error` as the device's last error.
    #[track_caller]
    pub(crate) fn record_error(&self, function: &str, error: &Error) {
        let info = ErrorInfo::capture(function, error);
        self.lock().last_error = Some(info);
    }
}

/// The sink handed to the transport at init.
pub(crate) struct SessionSink {
    pub shared: Arc<Shared>,
}

impl CallbackSink for SessionSink {
    fn on_stream(&self, tuner: Tuner, block: &StreamBlock<'_>) {
        self.shared.streams.route(tuner, block);
    }

    fn on_event(&self, event: DeviceEvent) {
        // State first, so the handler (and any dispatch it triggers) sees
        // the post-event mode.
        self.shared.lock().apply_event(&event);
        debug!(tuner = ?event.tuner, kind = ?event.kind, "device event");
        self.shared.events.deliver(&event);
    }
}

// ---------------------------------------------------------------
// ParamsRef
// ---------------------------------------------------------------

/// A reference to a device's parameter tree.
///
/// Obtained from [`RspDevice::params`](crate::device::RspDevice::params).
/// It becomes stale when the tree is replaced by a duo-mode swap or the
/// device is released; every access through a stale reference fails with
/// [`Error::StaleParameters`]. Fetch a new one after a swap.
#[derive(Clone)]
pub struct ParamsRef {
    shared: Arc<Shared>,
    generation: u64,
}

impl ParamsRef {
    pub(crate) fn new(shared: Arc<Shared>, generation: u64) -> Self {
        ParamsRef { shared, generation }
    }

    fn checked(&self) -> Result<MutexGuard<'_, DeviceState>> {
        let state = self.shared.lock();
        if state.generation != self.generation {
            error!(
                held = self.generation,
                current = state.generation,
                "access through a stale parameter reference"
            );
            return Err(Error::StaleParameters);
        }
        Ok(state)
    }

    /// `false` once the tree this reference points at has been replaced.
    pub fn is_current(&self) -> bool {
        self.checked().is_ok()
    }

    /// Read from the parameter tree.
    pub fn read<R>(&self, f: impl FnOnce(&DeviceParams) -> R) -> Result<R> {
        let state = self.checked()?;
        Ok(f(&state.params))
    }

    /// A copy of the whole parameter tree.
    pub fn snapshot(&self) -> Result<DeviceParams> {
        self.read(Clone::clone)
    }

    /// Change one field through a validating setter and stage its reason.
    ///
    /// ```ignore
    /// params.stage(|p| p.set_gain(Tuner::A, 40, 2))?;
    /// params.stage(|p| p.set_rf_frequency(Tuner::A, 100e6))?;
    /// device.commit(Tuner::A).await?;
    /// ```
    ///
    /// A channel field is staged against the tuner whose block changed, or
    /// against every owned tuner when the value was already current. A slave
    /// session cannot stage master-only fields: the change is rolled back and
    /// the call fails with `ModeViolation`. A failed setter leaves both the
    /// tree and the staged set unchanged.
    pub fn stage(&self, f: impl FnOnce(&mut DeviceParams) -> Result<Field>) -> Result<Field> {
        let mut state = self.checked()?;
        let before = state.params.clone();
        let field = f(&mut state.params)?;
        let reasons = field.encode();

        if state.mode == DuoMode::Slave {
            let master_only = reasons.master_only();
            if !master_only.is_empty() {
                state.params = before;
                warn!(
                    serial = %state.info.serial,
                    %field,
                    "master-only field staged on slave session"
                );
                return Err(Error::ModeViolation {
                    mode: state.mode,
                    operation: master_only.to_string(),
                });
            }
        }

        match field.scope() {
            FieldScope::Device => state.staged.device |= reasons,
            FieldScope::Channel => {
                let owned = state.tuners();
                let mut targets = [false; 2];
                for tuner in owned.tuners() {
                    targets[tuner.index()] =
                        state.params.channel(tuner).ok() != before.channel(tuner).ok();
                }
                if targets == [false; 2] {
                    for tuner in owned.tuners() {
                        targets[tuner.index()] = true;
                    }
                }
                for tuner in [Tuner::A, Tuner::B] {
                    if targets[tuner.index()] {
                        state.staged.channel[tuner.index()] |= reasons;
                    }
                }
            }
        }
        Ok(field)
    }

    /// Unstage `reasons` without applying them.
    ///
    /// The tree keeps the staged values; stage the old value again to
    /// revert a change.
    pub fn discard(&self, reasons: ReasonSet) -> Result<()> {
        self.checked()?.staged.discard(reasons);
        Ok(())
    }

    /// Reasons staged and not yet applied, on any tuner.
    pub fn staged(&self) -> Result<ReasonSet> {
        Ok(self.checked()?.staged.all())
    }

    /// Reasons a commit on `tuner` would send.
    pub fn staged_for(&self, tuner: Tuner) -> Result<ReasonSet> {
        Ok(self.checked()?.staged.for_tuner(tuner))
    }
}

impl std::fmt::Debug for ParamsRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamsRef")
            .field("generation", &self.generation)
            .field("current", &self.is_current())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A valid, streaming device state for unit tests.
    pub(crate) fn running_state(
        variant: DeviceVariant,
        mode: DuoMode,
        tuners: TunerSelect,
    ) -> DeviceState {
        DeviceState {
            info: DeviceInfo {
                serial: "TEST0001".into(),
                hw_ver: variant.hw_ver(),
                tuners,
                duo_mode: mode,
                duo_sample_freq: 6_000_000.0,
                valid: true,
                handle: Some(DeviceHandle(1)),
            },
            handle: DeviceHandle(1),
            variant,
            mode,
            params: DeviceParams::defaults(variant, mode, tuners, 6_000_000.0),
            generation: 0,
            staged: Staged::default(),
            valid: true,
            initialised: true,
            slave_attached: false,
            last_error: None,
        }
    }
}
