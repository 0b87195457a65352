//! Dual-tuner synchronizer.
//!
//! An RSPduo runs either one tuner (single-tuner mode) or both tuners from
//! one shared sample clock (dual-tuner mode). In dual-tuner mode two
//! independent sessions may share the device as master and slave. This
//! module implements the three transitions between those shapes:
//!
//! - [`swap_active_tuner`] -- single-tuner mode only; moves the session to
//!   the other tuner and drops anything staged for the old one.
//! - [`swap_sample_rate`] -- dual-tuner clock only; moves both channels to
//!   the other clock rate atomically.
//! - [`swap_duo_mode`] -- replaces the whole parameter tree with one shaped
//!   for the target mode; every outstanding [`ParamsRef`](crate::ParamsRef)
//!   goes stale.
//!
//! Slave attach/detach is not initiated here. The transport reports it as
//! an event, and the event path folds it into the session state before the
//! next operation is validated.

use tracing::info;

use rsplib_core::error::{Error, Result};
use rsplib_core::params::{self, MAX_SAMPLE_RATE_HZ, MIN_SAMPLE_RATE_HZ};
use rsplib_core::transport::{DuoModeSwap, Transport};
use rsplib_core::types::{AmPortSelect, DuoMode, Tuner};

use crate::state::{Shared, Staged, Transition};

fn require_duo(shared: &Shared, operation: &str) -> Result<DuoMode> {
    let state = shared.lock();
    state.ensure_valid()?;
    if !state.variant.is_duo() {
        return Err(Error::Unsupported(format!(
            "{operation} on {}",
            state.variant
        )));
    }
    Ok(state.mode)
}

/// Move a single-tuner session to `tuner`.
pub(crate) async fn swap_active_tuner(
    shared: &Shared,
    transport: &dyn Transport,
    tuner: Tuner,
    am_port: AmPortSelect,
) -> Result<()> {
    let _gate = shared.try_gate()?;
    let mode = require_duo(shared, "swap_active_tuner")?;
    if mode != DuoMode::Single {
        return Err(Error::ModeViolation {
            mode,
            operation: "swap_active_tuner".into(),
        });
    }
    if tuner == Tuner::B && am_port == AmPortSelect::Port1 {
        return Err(Error::InvalidParameter("tuner B has no HiZ port".into()));
    }

    let handle = {
        let state = shared.lock();
        if state.params.has_channel(tuner) {
            return Ok(());
        }
        state.handle
    };

    transport.swap_active_tuner(handle, tuner, am_port).await?;
    let params = transport.get_device_params(handle).await?;

    let mut state = shared.lock();
    state.params = params;
    state.info.tuners = tuner.into();
    state.staged = Staged::default();
    info!(serial = %state.info.serial, %tuner, "active tuner swapped");
    Ok(())
}

/// Move the shared dual-tuner clock to `rate_hz`. Returns the previous rate.
///
/// Both channels change together; on failure the previous rate stays.
pub(crate) async fn swap_sample_rate(
    shared: &Shared,
    transport: &dyn Transport,
    rate_hz: f64,
) -> Result<f64> {
    let _gate = shared.try_gate()?;
    let mode = require_duo(shared, "swap_sample_rate")?;
    if !mode.is_dual_clock() {
        return Err(Error::ModeViolation {
            mode,
            operation: "swap_sample_rate".into(),
        });
    }
    if !params::is_dual_tuner_rate(rate_hz) {
        return Err(Error::InvalidParameter(format!(
            "dual-tuner sample rate must be one of {:?}, got {rate_hz}",
            params::DUAL_TUNER_SAMPLE_RATES_HZ
        )));
    }

    let (handle, mut updated) = {
        let state = shared.lock();
        (state.handle, state.params.clone())
    };
    updated.set_dual_tuner_rate(rate_hz)?;

    let old = transport.swap_sample_rate(handle, rate_hz).await?;

    let mut state = shared.lock();
    state.params = updated;
    info!(serial = %state.info.serial, old_hz = old, new_hz = rate_hz, "sample rate swapped");
    Ok(old)
}

/// Change duo mode, replacing the parameter tree.
///
/// A master with a slave attached cannot leave master mode. Stream delivery
/// is reported as stopping while the swap runs.
pub(crate) async fn swap_duo_mode(
    shared: &Shared,
    transport: &dyn Transport,
    swap: &DuoModeSwap,
) -> Result<()> {
    let guard = shared.try_gate()?;
    let mode = require_duo(shared, "swap_duo_mode")?;
    let handle = {
        let state = shared.lock();
        if mode == DuoMode::Master && state.slave_attached {
            return Err(Error::ModeViolation {
                mode,
                operation: "swap_duo_mode with a slave attached".into(),
            });
        }
        state.handle
    };
    match swap.target {
        DuoMode::Single => {
            if !(MIN_SAMPLE_RATE_HZ..=MAX_SAMPLE_RATE_HZ).contains(&swap.sample_rate_hz) {
                return Err(Error::OutOfRange(format!(
                    "sample rate {} Hz",
                    swap.sample_rate_hz
                )));
            }
        }
        DuoMode::Dual | DuoMode::Master => {
            if !params::is_dual_tuner_rate(swap.sample_rate_hz) {
                return Err(Error::InvalidParameter(format!(
                    "dual-tuner sample rate must be one of {:?}, got {}",
                    params::DUAL_TUNER_SAMPLE_RATES_HZ,
                    swap.sample_rate_hz
                )));
            }
        }
        DuoMode::Slave | DuoMode::Unknown => {
            return Err(Error::InvalidParameter(format!(
                "cannot swap into {} mode",
                swap.target
            )));
        }
    }
    if mode == DuoMode::Slave {
        return Err(Error::ModeViolation {
            mode,
            operation: "swap_duo_mode".into(),
        });
    }

    shared.set_transition(Transition::Stopping);
    let outcome = transport.swap_duo_mode(handle, swap).await.map(|params| {
        let mut state = shared.lock();
        state.params = params;
        state.mode = swap.target;
        state.info.duo_mode = swap.target;
        state.info.tuners = state.params.tuners();
        state.generation += 1;
        state.staged = Staged::default();
        info!(
            serial = %state.info.serial,
            from = %mode,
            to = %swap.target,
            generation = state.generation,
            "duo mode swapped"
        );
    });
    // Release the gate before announcing idle so waiters can take it.
    drop(guard);
    shared.set_transition(Transition::Idle);
    outcome
}
