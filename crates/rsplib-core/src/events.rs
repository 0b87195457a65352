//! Asynchronous device event types.
//!
//! Events are produced by the transport on its own callback context and
//! delivered, in arrival order and without coalescing, to the session's
//! registered event handler.

use crate::types::{DuoMode, TunerSelect};

/// Overload detector transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerOverload {
    Detected,
    Corrected,
}

/// Master/slave presence change on a dual-tuner device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DuoModeChange {
    MasterInitialised,
    SlaveAttached,
    SlaveDetached,
    SlaveInitialised,
    SlaveUninitialised,
    MasterDllDisappeared,
    SlaveDllDisappeared,
}

/// What happened.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// The hardware changed gain, either on request or under AGC.
    GainChange {
        /// IF gain reduction in dB.
        gr_db: u32,
        /// LNA gain reduction in dB.
        lna_gr_db: u32,
        /// Resulting system gain in dB.
        curr_gain: f64,
    },

    /// The ADC overload detector changed state. Each transition must be
    /// acknowledged before the next is reported.
    PowerOverload(PowerOverload),

    /// The device was unplugged.
    DeviceRemoved,

    /// A master or slave session appeared or went away.
    DuoModeChange(DuoModeChange),

    /// The device stopped responding.
    DeviceFailure,
}

/// An event reported by the transport, tagged with the tuner it concerns.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEvent {
    pub tuner: TunerSelect,
    pub kind: EventKind,
}

impl DeviceEvent {
    pub fn new(tuner: TunerSelect, kind: EventKind) -> Self {
        DeviceEvent { tuner, kind }
    }

    /// `true` if, once delivered, this event ends a session in `mode`.
    ///
    /// Removal and failure end every session. A slave also loses its
    /// device when the master's service library goes away.
    pub fn is_terminal(&self, mode: DuoMode) -> bool {
        match &self.kind {
            EventKind::DeviceRemoved | EventKind::DeviceFailure => true,
            EventKind::DuoModeChange(DuoModeChange::MasterDllDisappeared) => {
                mode == DuoMode::Slave
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_events() {
        let removed = DeviceEvent::new(TunerSelect::A, EventKind::DeviceRemoved);
        assert!(removed.is_terminal(DuoMode::Single));
        let failure = DeviceEvent::new(TunerSelect::Both, EventKind::DeviceFailure);
        assert!(failure.is_terminal(DuoMode::Master));
        let overload = DeviceEvent::new(
            TunerSelect::A,
            EventKind::PowerOverload(PowerOverload::Detected),
        );
        assert!(!overload.is_terminal(DuoMode::Single));
    }

    #[test]
    fn master_dll_loss_only_ends_slave() {
        let ev = DeviceEvent::new(
            TunerSelect::B,
            EventKind::DuoModeChange(DuoModeChange::MasterDllDisappeared),
        );
        assert!(ev.is_terminal(DuoMode::Slave));
        assert!(!ev.is_terminal(DuoMode::Master));
    }
}
