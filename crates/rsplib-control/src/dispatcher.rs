//! Update dispatcher.
//!
//! Turns a reason set into exactly one transport `update` call, after
//! checking it against the device's session state in a fixed order:
//!
//! 1. The device must be valid and streaming, else `NotInitialised`.
//! 2. No stream start/stop may be in progress, else `StartPending` /
//!    `StopPending` (or a bounded wait, per [`PendingPolicy`]).
//! 3. No other control operation may be in flight, else `Reentrant`.
//! 4. A slave session may not request master-only reasons.
//! 5. The tuner must have a channel in this session, and every
//!    variant-specific reason must belong to this device's variant.
//!
//! An empty reason set is a successful no-op. The transport receives the
//! reasons already in precedence order (gain first). On success the applied
//! reasons leave the staged set and the reported gain values are recorded;
//! on failure nothing is consumed, so the caller may retry or revert.

use std::sync::Arc;

use tokio::sync::MutexGuard;
use tracing::{debug, warn};

use rsplib_core::error::{Error, Result};
use rsplib_core::reason::{Reason, ReasonSet};
use rsplib_core::transport::{ApplyReport, Transport, UpdateBatch};
use rsplib_core::types::{DuoMode, Tuner};

use crate::builder::PendingPolicy;
use crate::state::{Shared, Transition};

/// Validates and applies update requests for one device.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    transport: Arc<dyn Transport>,
    policy: PendingPolicy,
}

impl Dispatcher {
    pub(crate) fn new(transport: Arc<dyn Transport>, policy: PendingPolicy) -> Self {
        Dispatcher { transport, policy }
    }

    /// Take the control gate for a dispatch, honouring the pending policy.
    pub(crate) async fn acquire<'a>(&self, shared: &'a Shared) -> Result<MutexGuard<'a, ()>> {
        shared.lock().ensure_running()?;

        if let Some(err) = shared.transition().pending_error() {
            match self.policy {
                PendingPolicy::FailFast => return Err(err),
                PendingPolicy::Wait { timeout } => {
                    let mut rx = shared.transition.subscribe();
                    tokio::time::timeout(timeout, rx.wait_for(|t| *t == Transition::Idle))
                        .await
                        .map_err(|_| Error::Timeout)?
                        .map_err(|_| Error::NotInitialised)?;
                    shared.lock().ensure_running()?;
                }
            }
        }

        // A transition may have started between the check and the lock.
        shared.try_gate()
    }

    /// Validate and apply `reasons` on `tuner`.
    pub(crate) async fn dispatch(
        &self,
        shared: &Shared,
        tuner: Tuner,
        reasons: ReasonSet,
    ) -> Result<()> {
        let _gate = self.acquire(shared).await?;
        self.dispatch_locked(shared, tuner, reasons).await
    }

    /// Dispatch with the control gate already held by the caller.
    pub(crate) async fn dispatch_locked(
        &self,
        shared: &Shared,
        tuner: Tuner,
        reasons: ReasonSet,
    ) -> Result<()> {
        let (handle, generation, params) = {
            let state = shared.lock();
            state.ensure_running()?;

            if state.mode == DuoMode::Slave {
                let master_only = reasons.master_only();
                if !master_only.is_empty() {
                    warn!(
                        serial = %state.info.serial,
                        reasons = %master_only,
                        "master-only update rejected on slave session"
                    );
                    return Err(Error::ModeViolation {
                        mode: state.mode,
                        operation: master_only.to_string(),
                    });
                }
            }

            if !state.tuners().contains(tuner) {
                return Err(Error::InvalidParameter(format!(
                    "tuner {tuner} is not part of this {} session",
                    state.mode
                )));
            }

            let foreign = reasons.foreign_to(state.variant);
            if !foreign.is_empty() {
                return Err(Error::Unsupported(format!(
                    "{foreign} on {}",
                    state.variant
                )));
            }

            if reasons.is_empty() {
                return Ok(());
            }

            (state.handle, state.generation, state.params.clone())
        };

        let batch = UpdateBatch::new(tuner, reasons);
        debug!(%tuner, reasons = %reasons, "dispatching update");
        let report = self.transport.update(handle, &batch, &params).await?;
        self.consume(shared, generation, tuner, reasons, report);
        Ok(())
    }

    /// Retire applied reasons and record what the hardware reported.
    fn consume(
        &self,
        shared: &Shared,
        generation: u64,
        tuner: Tuner,
        reasons: ReasonSet,
        report: ApplyReport,
    ) {
        let mut state = shared.lock();
        if state.generation != generation {
            return;
        }
        state.staged.retire(tuner, reasons);
        if reasons.contains(Reason::DevResetFlags) {
            state.params.clear_reset_flags();
        }
        for (tuner, values) in report.gain_values {
            let _ = state.params.record_gain_values(tuner, values);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rsplib_core::error::ApiStatus;
    use rsplib_core::types::{DeviceVariant, TunerSelect};
    use rsplib_test_harness::{FakeOp, FakeTransport};

    use crate::state::testing::running_state as state;

    fn setup(
        variant: DeviceVariant,
        mode: DuoMode,
        tuners: TunerSelect,
    ) -> (Arc<FakeTransport>, Dispatcher, Arc<Shared>) {
        let fake = Arc::new(FakeTransport::new());
        let dispatcher = Dispatcher::new(fake.clone(), PendingPolicy::FailFast);
        let shared = Shared::new(state(variant, mode, tuners));
        (fake, dispatcher, shared)
    }

    #[tokio::test]
    async fn applies_in_precedence_order() {
        let (fake, d, shared) = setup(DeviceVariant::Rsp1a, DuoMode::Unknown, TunerSelect::A);
        let reasons = ReasonSet::from(Reason::TunerBwType)
            .with(Reason::TunerFrf)
            .with(Reason::TunerGr);
        d.dispatch(&shared, Tuner::A, reasons).await.unwrap();

        let applied = fake.applied();
        assert_eq!(applied.len(), 1);
        assert_eq!(
            applied[0].reasons,
            vec![Reason::TunerGr, Reason::TunerFrf, Reason::TunerBwType]
        );
    }

    #[tokio::test]
    async fn slave_rejects_master_only_without_apply() {
        let (fake, d, shared) = setup(DeviceVariant::RspDuo, DuoMode::Slave, TunerSelect::B);
        let err = d
            .dispatch(&shared, Tuner::B, ReasonSet::from(Reason::DevFs).with(Reason::TunerGr))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ModeViolation { mode: DuoMode::Slave, .. }));
        assert_eq!(err.status(), ApiStatus::InvalidMode);
        assert_eq!(fake.update_count(), 0);
    }

    #[tokio::test]
    async fn slave_may_change_its_tuner() {
        let (fake, d, shared) = setup(DeviceVariant::RspDuo, DuoMode::Slave, TunerSelect::B);
        d.dispatch(&shared, Tuner::B, ReasonSet::from(Reason::TunerFrf))
            .await
            .unwrap();
        assert_eq!(fake.update_count(), 1);
        // But not the master's.
        assert!(
            d.dispatch(&shared, Tuner::A, ReasonSet::from(Reason::TunerFrf))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn not_running_is_not_initialised() {
        let (fake, d, shared) = setup(DeviceVariant::Rsp1a, DuoMode::Unknown, TunerSelect::A);
        shared.lock().initialised = false;
        let err = d
            .dispatch(&shared, Tuner::A, ReasonSet::from(Reason::TunerGr))
            .await
            .unwrap_err();
        assert_eq!(err, Error::NotInitialised);
        assert_eq!(fake.update_count(), 0);
    }

    #[tokio::test]
    async fn pending_transition_fails_fast() {
        let (_, d, shared) = setup(DeviceVariant::Rsp1a, DuoMode::Unknown, TunerSelect::A);
        shared.set_transition(Transition::Stopping);
        let err = d
            .dispatch(&shared, Tuner::A, ReasonSet::from(Reason::TunerGr))
            .await
            .unwrap_err();
        assert_eq!(err, Error::StopPending);
    }

    #[tokio::test]
    async fn pending_transition_can_be_waited_out() {
        let fake = Arc::new(FakeTransport::new());
        let d = Dispatcher::new(
            fake.clone(),
            PendingPolicy::Wait {
                timeout: Duration::from_secs(1),
            },
        );
        let shared = Shared::new(state(DeviceVariant::Rsp1a, DuoMode::Unknown, TunerSelect::A));
        shared.set_transition(Transition::Starting);

        let waker = shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waker.set_transition(Transition::Idle);
        });
        d.dispatch(&shared, Tuner::A, ReasonSet::from(Reason::TunerGr))
            .await
            .unwrap();
        assert_eq!(fake.update_count(), 1);
    }

    #[tokio::test]
    async fn wait_policy_times_out() {
        let fake = Arc::new(FakeTransport::new());
        let d = Dispatcher::new(
            fake,
            PendingPolicy::Wait {
                timeout: Duration::from_millis(20),
            },
        );
        let shared = Shared::new(state(DeviceVariant::Rsp1a, DuoMode::Unknown, TunerSelect::A));
        shared.set_transition(Transition::Starting);
        let err = d
            .dispatch(&shared, Tuner::A, ReasonSet::from(Reason::TunerGr))
            .await
            .unwrap_err();
        assert_eq!(err, Error::Timeout);
    }

    #[tokio::test]
    async fn concurrent_dispatch_is_reentrant() {
        let (fake, d, shared) = setup(DeviceVariant::Rsp1a, DuoMode::Unknown, TunerSelect::A);
        fake.set_delay(FakeOp::Update, Duration::from_millis(100));

        let first = {
            let d = d.clone();
            let shared = shared.clone();
            tokio::spawn(async move {
                d.dispatch(&shared, Tuner::A, ReasonSet::from(Reason::TunerGr))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let err = d
            .dispatch(&shared, Tuner::A, ReasonSet::from(Reason::TunerFrf))
            .await
            .unwrap_err();
        assert_eq!(err, Error::Reentrant);
        first.await.unwrap().unwrap();
        assert_eq!(fake.update_count(), 1);
    }

    #[tokio::test]
    async fn failure_leaves_staged_reasons() {
        let (fake, d, shared) = setup(DeviceVariant::Rsp1a, DuoMode::Unknown, TunerSelect::A);
        let reasons = ReasonSet::from(Reason::TunerFrf);
        shared.lock().staged.channel[Tuner::A.index()] = reasons;
        fake.fail_next(FakeOp::Update, ApiStatus::RfUpdateError);

        let err = d.dispatch(&shared, Tuner::A, reasons).await.unwrap_err();
        assert_eq!(err, Error::Status(ApiStatus::RfUpdateError));
        assert_eq!(shared.lock().staged.for_tuner(Tuner::A), reasons);

        d.dispatch(&shared, Tuner::A, reasons).await.unwrap();
        assert!(shared.lock().staged.all().is_empty());
    }

    #[tokio::test]
    async fn foreign_variant_bits_rejected() {
        let (fake, d, shared) = setup(DeviceVariant::Rsp1a, DuoMode::Unknown, TunerSelect::A);
        let err = d
            .dispatch(&shared, Tuner::A, ReasonSet::from(Reason::RspDxHdrEnable))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        assert_eq!(fake.update_count(), 0);
    }

    #[tokio::test]
    async fn empty_set_is_a_noop() {
        let (fake, d, shared) = setup(DeviceVariant::Rsp1a, DuoMode::Unknown, TunerSelect::A);
        d.dispatch(&shared, Tuner::A, ReasonSet::empty()).await.unwrap();
        assert_eq!(fake.update_count(), 0);
    }

    #[tokio::test]
    async fn gain_values_recorded() {
        let (_, d, shared) = setup(DeviceVariant::Rsp1a, DuoMode::Unknown, TunerSelect::A);
        shared.lock().params.set_gain(Tuner::A, 40, 0).unwrap();
        d.dispatch(&shared, Tuner::A, ReasonSet::from(Reason::TunerGr))
            .await
            .unwrap();
        let state = shared.lock();
        let observed = state.params.channel(Tuner::A).unwrap().tuner.gain.observed;
        assert_eq!(observed.map(|g| g.curr), Some(40.0));
    }
}
