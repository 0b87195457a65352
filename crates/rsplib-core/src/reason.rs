//! Reason-for-update encoding.
//!
//! The service applies staged parameters only for the sub-fields named in an
//! update request. Each named sub-field is one bit in one of two independent
//! 32-bit domains ([`ReasonDomain::Primary`] and [`ReasonDomain::Ext1`]).
//!
//! - [`Reason`] names every defined bit.
//! - [`ReasonSet`] is a union of reasons across both domains and iterates in
//!   the fixed hardware precedence order ([`Reason::PRECEDENCE`]).
//! - [`Field`] names every mutable leaf of the parameter tree; [`encode`]
//!   maps a dotted field path onto its reasons.
//!
//! # Precedence
//!
//! Gain must settle before frequency, bandwidth or any other change in the
//! same batch is applied, so [`Reason::TunerGr`] is always first. The
//! remaining order is tuner, control, device, then variant-specific bits.

use std::fmt;
use std::str::FromStr;

use tracing::error;

use crate::error::{Error, Result};
use crate::types::DeviceVariant;

/// The two independent reason bitmask domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonDomain {
    Primary,
    Ext1,
}

/// A single named reason-for-update bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    // Device level, master only.
    DevFs,
    DevPpm,
    DevSyncUpdate,
    DevResetFlags,
    Rsp1aBiasT,
    Rsp1aRfNotch,
    Rsp1aRfDabNotch,
    Rsp2BiasT,
    Rsp2AmPortSelect,
    Rsp2AntennaControl,
    Rsp2RfNotch,
    Rsp2ExtRef,
    RspDuoExtRef,
    // Per channel.
    TunerGr,
    TunerGrLimits,
    TunerFrf,
    TunerBwType,
    TunerIfType,
    TunerDcOffset,
    TunerLoMode,
    CtrlDcOffsetIqImbalance,
    CtrlDecimation,
    CtrlAgc,
    CtrlAdsbMode,
    CtrlOverloadMsgAck,
    RspDuoBiasT,
    RspDuoAmPortSelect,
    RspDuoTuner1AmNotch,
    RspDuoRfNotch,
    RspDuoRfDabNotch,
    // Extension 1, master only.
    RspDxHdrEnable,
    RspDxBiasT,
    RspDxAntennaControl,
    RspDxRfNotch,
    RspDxRfDabNotch,
    RspDxHdrBw,
}

impl Reason {
    /// Every reason, in the order a dispatcher must apply them.
    pub const PRECEDENCE: [Reason; 36] = [
        Reason::TunerGr,
        Reason::TunerGrLimits,
        Reason::TunerFrf,
        Reason::TunerBwType,
        Reason::TunerIfType,
        Reason::TunerLoMode,
        Reason::TunerDcOffset,
        Reason::CtrlDcOffsetIqImbalance,
        Reason::CtrlDecimation,
        Reason::CtrlAgc,
        Reason::CtrlAdsbMode,
        Reason::CtrlOverloadMsgAck,
        Reason::DevFs,
        Reason::DevPpm,
        Reason::DevSyncUpdate,
        Reason::DevResetFlags,
        Reason::Rsp1aBiasT,
        Reason::Rsp1aRfNotch,
        Reason::Rsp1aRfDabNotch,
        Reason::Rsp2BiasT,
        Reason::Rsp2AmPortSelect,
        Reason::Rsp2AntennaControl,
        Reason::Rsp2RfNotch,
        Reason::Rsp2ExtRef,
        Reason::RspDuoExtRef,
        Reason::RspDuoBiasT,
        Reason::RspDuoAmPortSelect,
        Reason::RspDuoTuner1AmNotch,
        Reason::RspDuoRfNotch,
        Reason::RspDuoRfDabNotch,
        Reason::RspDxHdrEnable,
        Reason::RspDxBiasT,
        Reason::RspDxAntennaControl,
        Reason::RspDxRfNotch,
        Reason::RspDxRfDabNotch,
        Reason::RspDxHdrBw,
    ];

    /// Which bitmask this reason lives in.
    pub fn domain(self) -> ReasonDomain {
        match self {
            Reason::RspDxHdrEnable
            | Reason::RspDxBiasT
            | Reason::RspDxAntennaControl
            | Reason::RspDxRfNotch
            | Reason::RspDxRfDabNotch
            | Reason::RspDxHdrBw => ReasonDomain::Ext1,
            _ => ReasonDomain::Primary,
        }
    }

    /// The bit value within [`Reason::domain`].
    pub fn mask(self) -> u32 {
        match self {
            Reason::DevFs => 0x0000_0001,
            Reason::DevPpm => 0x0000_0002,
            Reason::DevSyncUpdate => 0x0000_0004,
            Reason::DevResetFlags => 0x0000_0008,
            Reason::Rsp1aBiasT => 0x0000_0010,
            Reason::Rsp1aRfNotch => 0x0000_0020,
            Reason::Rsp1aRfDabNotch => 0x0000_0040,
            Reason::Rsp2BiasT => 0x0000_0080,
            Reason::Rsp2AmPortSelect => 0x0000_0100,
            Reason::Rsp2AntennaControl => 0x0000_0200,
            Reason::Rsp2RfNotch => 0x0000_0400,
            Reason::Rsp2ExtRef => 0x0000_0800,
            Reason::RspDuoExtRef => 0x0000_1000,
            Reason::TunerGr => 0x0000_8000,
            Reason::TunerGrLimits => 0x0001_0000,
            Reason::TunerFrf => 0x0002_0000,
            Reason::TunerBwType => 0x0004_0000,
            Reason::TunerIfType => 0x0008_0000,
            Reason::TunerDcOffset => 0x0010_0000,
            Reason::TunerLoMode => 0x0020_0000,
            Reason::CtrlDcOffsetIqImbalance => 0x0040_0000,
            Reason::CtrlDecimation => 0x0080_0000,
            Reason::CtrlAgc => 0x0100_0000,
            Reason::CtrlAdsbMode => 0x0200_0000,
            Reason::CtrlOverloadMsgAck => 0x0400_0000,
            Reason::RspDuoBiasT => 0x0800_0000,
            Reason::RspDuoAmPortSelect => 0x1000_0000,
            Reason::RspDuoTuner1AmNotch => 0x2000_0000,
            Reason::RspDuoRfNotch => 0x4000_0000,
            Reason::RspDuoRfDabNotch => 0x8000_0000,
            Reason::RspDxHdrEnable => 0x0000_0001,
            Reason::RspDxBiasT => 0x0000_0002,
            Reason::RspDxAntennaControl => 0x0000_0004,
            Reason::RspDxRfNotch => 0x0000_0008,
            Reason::RspDxRfDabNotch => 0x0000_0010,
            Reason::RspDxHdrBw => 0x0000_0020,
        }
    }

    /// `true` for bits only a master (or non-slave) session may request.
    ///
    /// In the primary domain these are the bits below [`Reason::TunerGr`];
    /// every extension-1 bit is master only.
    pub fn is_master_only(self) -> bool {
        match self.domain() {
            ReasonDomain::Primary => self.mask() < Reason::TunerGr.mask(),
            ReasonDomain::Ext1 => true,
        }
    }

    /// The only variant this bit applies to, if it is variant-specific.
    pub fn variant(self) -> Option<DeviceVariant> {
        match self {
            Reason::Rsp1aBiasT | Reason::Rsp1aRfNotch | Reason::Rsp1aRfDabNotch => {
                Some(DeviceVariant::Rsp1a)
            }
            Reason::Rsp2BiasT
            | Reason::Rsp2AmPortSelect
            | Reason::Rsp2AntennaControl
            | Reason::Rsp2RfNotch
            | Reason::Rsp2ExtRef => Some(DeviceVariant::Rsp2),
            Reason::RspDuoExtRef
            | Reason::RspDuoBiasT
            | Reason::RspDuoAmPortSelect
            | Reason::RspDuoTuner1AmNotch
            | Reason::RspDuoRfNotch
            | Reason::RspDuoRfDabNotch => Some(DeviceVariant::RspDuo),
            Reason::RspDxHdrEnable
            | Reason::RspDxBiasT
            | Reason::RspDxAntennaControl
            | Reason::RspDxRfNotch
            | Reason::RspDxRfDabNotch
            | Reason::RspDxHdrBw => Some(DeviceVariant::RspDx),
            _ => None,
        }
    }

    /// The service's name for this bit.
    pub fn name(self) -> &'static str {
        match self {
            Reason::DevFs => "Dev_Fs",
            Reason::DevPpm => "Dev_Ppm",
            Reason::DevSyncUpdate => "Dev_SyncUpdate",
            Reason::DevResetFlags => "Dev_ResetFlags",
            Reason::Rsp1aBiasT => "Rsp1a_BiasTControl",
            Reason::Rsp1aRfNotch => "Rsp1a_RfNotchControl",
            Reason::Rsp1aRfDabNotch => "Rsp1a_RfDabNotchControl",
            Reason::Rsp2BiasT => "Rsp2_BiasTControl",
            Reason::Rsp2AmPortSelect => "Rsp2_AmPortSelect",
            Reason::Rsp2AntennaControl => "Rsp2_AntennaControl",
            Reason::Rsp2RfNotch => "Rsp2_RfNotchControl",
            Reason::Rsp2ExtRef => "Rsp2_ExtRefControl",
            Reason::RspDuoExtRef => "RspDuo_ExtRefControl",
            Reason::TunerGr => "Tuner_Gr",
            Reason::TunerGrLimits => "Tuner_GrLimits",
            Reason::TunerFrf => "Tuner_Frf",
            Reason::TunerBwType => "Tuner_BwType",
            Reason::TunerIfType => "Tuner_IfType",
            Reason::TunerDcOffset => "Tuner_DcOffset",
            Reason::TunerLoMode => "Tuner_LoMode",
            Reason::CtrlDcOffsetIqImbalance => "Ctrl_DCoffsetIQimbalance",
            Reason::CtrlDecimation => "Ctrl_Decimation",
            Reason::CtrlAgc => "Ctrl_Agc",
            Reason::CtrlAdsbMode => "Ctrl_AdsbMode",
            Reason::CtrlOverloadMsgAck => "Ctrl_OverloadMsgAck",
            Reason::RspDuoBiasT => "RspDuo_BiasTControl",
            Reason::RspDuoAmPortSelect => "RspDuo_AmPortSelect",
            Reason::RspDuoTuner1AmNotch => "RspDuo_Tuner1AmNotchControl",
            Reason::RspDuoRfNotch => "RspDuo_RfNotchControl",
            Reason::RspDuoRfDabNotch => "RspDuo_RfDabNotchControl",
            Reason::RspDxHdrEnable => "RspDx_HdrEnable",
            Reason::RspDxBiasT => "RspDx_BiasTControl",
            Reason::RspDxAntennaControl => "RspDx_AntennaControl",
            Reason::RspDxRfNotch => "RspDx_RfNotchControl",
            Reason::RspDxRfDabNotch => "RspDx_RfDabNotchControl",
            Reason::RspDxHdrBw => "RspDx_HdrBw",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------
// ReasonSet
// ---------------------------------------------------------------

/// A set of reasons spanning both bitmask domains.
///
/// Sets accumulate by union until dispatched, so several staged field
/// changes travel to the hardware as one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ReasonSet {
    primary: u32,
    ext1: u32,
}

impl ReasonSet {
    /// The empty set.
    pub const fn empty() -> Self {
        ReasonSet {
            primary: 0,
            ext1: 0,
        }
    }

    /// Build a set from raw masks.
    ///
    /// Fails with [`Error::InvalidParameter`] if either mask carries a bit
    /// with no defined meaning (including the two master spare bits).
    pub fn from_masks(primary: u32, ext1: u32) -> Result<Self> {
        let set = Reason::PRECEDENCE
            .iter()
            .filter(|r| {
                let mask = match r.domain() {
                    ReasonDomain::Primary => primary,
                    ReasonDomain::Ext1 => ext1,
                };
                mask & r.mask() != 0
            })
            .fold(ReasonSet::empty(), |acc, r| acc.with(*r));
        if set.primary != primary || set.ext1 != ext1 {
            return Err(Error::InvalidParameter(format!(
                "undefined reason bits: primary {:#010x}, ext1 {:#010x}",
                primary & !set.primary,
                ext1 & !set.ext1
            )));
        }
        Ok(set)
    }

    /// The raw primary-domain mask.
    pub fn primary(&self) -> u32 {
        self.primary
    }

    /// The raw extension-1 mask.
    pub fn ext1(&self) -> u32 {
        self.ext1
    }

    pub fn is_empty(&self) -> bool {
        self.primary == 0 && self.ext1 == 0
    }

    pub fn len(&self) -> usize {
        (self.primary.count_ones() + self.ext1.count_ones()) as usize
    }

    pub fn contains(&self, reason: Reason) -> bool {
        match reason.domain() {
            ReasonDomain::Primary => self.primary & reason.mask() != 0,
            ReasonDomain::Ext1 => self.ext1 & reason.mask() != 0,
        }
    }

    pub fn insert(&mut self, reason: Reason) {
        match reason.domain() {
            ReasonDomain::Primary => self.primary |= reason.mask(),
            ReasonDomain::Ext1 => self.ext1 |= reason.mask(),
        }
    }

    /// Builder-style [`ReasonSet::insert`].
    pub fn with(mut self, reason: Reason) -> Self {
        self.insert(reason);
        self
    }

    pub fn union(self, other: ReasonSet) -> ReasonSet {
        ReasonSet {
            primary: self.primary | other.primary,
            ext1: self.ext1 | other.ext1,
        }
    }

    pub fn difference(self, other: ReasonSet) -> ReasonSet {
        ReasonSet {
            primary: self.primary & !other.primary,
            ext1: self.ext1 & !other.ext1,
        }
    }

    /// The subset of reasons that only a master session may request.
    pub fn master_only(&self) -> ReasonSet {
        self.iter()
            .filter(|r| r.is_master_only())
            .fold(ReasonSet::empty(), |acc, r| acc.with(r))
    }

    /// The subset of reasons that do not apply to `variant`.
    pub fn foreign_to(&self, variant: DeviceVariant) -> ReasonSet {
        self.iter()
            .filter(|r| r.variant().is_some_and(|v| v != variant))
            .fold(ReasonSet::empty(), |acc, r| acc.with(r))
    }

    /// Iterate the reasons in precedence order.
    pub fn iter(&self) -> impl Iterator<Item = Reason> + '_ {
        Reason::PRECEDENCE
            .iter()
            .copied()
            .filter(move |r| self.contains(*r))
    }
}

impl From<Reason> for ReasonSet {
    fn from(reason: Reason) -> Self {
        ReasonSet::empty().with(reason)
    }
}

impl FromIterator<Reason> for ReasonSet {
    fn from_iter<I: IntoIterator<Item = Reason>>(iter: I) -> Self {
        iter.into_iter()
            .fold(ReasonSet::empty(), |acc, r| acc.with(r))
    }
}

impl std::ops::BitOr for ReasonSet {
    type Output = ReasonSet;

    fn bitor(self, rhs: ReasonSet) -> ReasonSet {
        self.union(rhs)
    }
}

impl std::ops::BitOrAssign for ReasonSet {
    fn bitor_assign(&mut self, rhs: ReasonSet) {
        *self = self.union(rhs);
    }
}

impl fmt::Display for ReasonSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, reason) in self.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            f.write_str(reason.name())?;
        }
        f.write_str("}")
    }
}

// ---------------------------------------------------------------
// Field paths
// ---------------------------------------------------------------

/// Whether a field lives in the device block or in a channel block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldScope {
    Device,
    Channel,
}

/// A mutable leaf of the parameter tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    SampleRate,
    Ppm,
    SyncUpdate,
    ResetGain,
    ResetRf,
    ResetFs,
    Rsp1aRfNotch,
    Rsp1aRfDabNotch,
    Rsp2ExtRef,
    RspDuoExtRef,
    RspDxHdrEnable,
    RspDxBiasT,
    RspDxAntenna,
    RspDxRfNotch,
    RspDxRfDabNotch,
    GainReduction,
    LnaState,
    MinGainReduction,
    RfFrequency,
    Bandwidth,
    IfType,
    LoMode,
    TunerDcOffset,
    CtrlDcOffset,
    CtrlIqImbalance,
    Decimation,
    Agc,
    AdsbMode,
    Rsp1aBiasT,
    Rsp2BiasT,
    Rsp2AmPort,
    Rsp2Antenna,
    Rsp2RfNotch,
    RspDuoBiasT,
    RspDuoAmPort,
    RspDuoTuner1AmNotch,
    RspDuoRfNotch,
    RspDuoRfDabNotch,
    RspDxHdrBw,
}

const FIELD_PATHS: &[(&str, Field)] = &[
    ("dev.fs", Field::SampleRate),
    ("dev.ppm", Field::Ppm),
    ("dev.sync_update", Field::SyncUpdate),
    ("dev.reset.gr", Field::ResetGain),
    ("dev.reset.rf", Field::ResetRf),
    ("dev.reset.fs", Field::ResetFs),
    ("dev.rsp1a.rf_notch", Field::Rsp1aRfNotch),
    ("dev.rsp1a.rf_dab_notch", Field::Rsp1aRfDabNotch),
    ("dev.rsp2.ext_ref", Field::Rsp2ExtRef),
    ("dev.rspduo.ext_ref", Field::RspDuoExtRef),
    ("dev.rspdx.hdr_enable", Field::RspDxHdrEnable),
    ("dev.rspdx.bias_t", Field::RspDxBiasT),
    ("dev.rspdx.antenna", Field::RspDxAntenna),
    ("dev.rspdx.rf_notch", Field::RspDxRfNotch),
    ("dev.rspdx.rf_dab_notch", Field::RspDxRfDabNotch),
    ("rx.tuner.gain.gr_db", Field::GainReduction),
    ("rx.tuner.gain.lna_state", Field::LnaState),
    ("rx.tuner.gain.min_gr", Field::MinGainReduction),
    ("rx.tuner.rf_hz", Field::RfFrequency),
    ("rx.tuner.bw", Field::Bandwidth),
    ("rx.tuner.if", Field::IfType),
    ("rx.tuner.lo_mode", Field::LoMode),
    ("rx.tuner.dc_offset", Field::TunerDcOffset),
    ("rx.ctrl.dc_offset", Field::CtrlDcOffset),
    ("rx.ctrl.iq_imbalance", Field::CtrlIqImbalance),
    ("rx.ctrl.decimation", Field::Decimation),
    ("rx.ctrl.agc", Field::Agc),
    ("rx.ctrl.adsb_mode", Field::AdsbMode),
    ("rx.rsp1a.bias_t", Field::Rsp1aBiasT),
    ("rx.rsp2.bias_t", Field::Rsp2BiasT),
    ("rx.rsp2.am_port", Field::Rsp2AmPort),
    ("rx.rsp2.antenna", Field::Rsp2Antenna),
    ("rx.rsp2.rf_notch", Field::Rsp2RfNotch),
    ("rx.rspduo.bias_t", Field::RspDuoBiasT),
    ("rx.rspduo.am_port", Field::RspDuoAmPort),
    ("rx.rspduo.tuner1_am_notch", Field::RspDuoTuner1AmNotch),
    ("rx.rspduo.rf_notch", Field::RspDuoRfNotch),
    ("rx.rspduo.rf_dab_notch", Field::RspDuoRfDabNotch),
    ("rx.rspdx.hdr_bw", Field::RspDxHdrBw),
];

impl Field {
    /// The dotted path naming this field.
    pub fn path(self) -> &'static str {
        FIELD_PATHS
            .iter()
            .find(|(_, f)| *f == self)
            .map(|(p, _)| *p)
            .unwrap_or("?")
    }

    pub fn scope(self) -> FieldScope {
        if self.path().starts_with("dev.") {
            FieldScope::Device
        } else {
            FieldScope::Channel
        }
    }

    /// The reason bit that applies this field.
    pub fn reason(self) -> Reason {
        match self {
            Field::SampleRate => Reason::DevFs,
            Field::Ppm => Reason::DevPpm,
            Field::SyncUpdate => Reason::DevSyncUpdate,
            Field::ResetGain | Field::ResetRf | Field::ResetFs => Reason::DevResetFlags,
            Field::Rsp1aRfNotch => Reason::Rsp1aRfNotch,
            Field::Rsp1aRfDabNotch => Reason::Rsp1aRfDabNotch,
            Field::Rsp2ExtRef => Reason::Rsp2ExtRef,
            Field::RspDuoExtRef => Reason::RspDuoExtRef,
            Field::RspDxHdrEnable => Reason::RspDxHdrEnable,
            Field::RspDxBiasT => Reason::RspDxBiasT,
            Field::RspDxAntenna => Reason::RspDxAntennaControl,
            Field::RspDxRfNotch => Reason::RspDxRfNotch,
            Field::RspDxRfDabNotch => Reason::RspDxRfDabNotch,
            Field::GainReduction | Field::LnaState => Reason::TunerGr,
            Field::MinGainReduction => Reason::TunerGrLimits,
            Field::RfFrequency => Reason::TunerFrf,
            Field::Bandwidth => Reason::TunerBwType,
            Field::IfType => Reason::TunerIfType,
            Field::LoMode => Reason::TunerLoMode,
            Field::TunerDcOffset => Reason::TunerDcOffset,
            Field::CtrlDcOffset | Field::CtrlIqImbalance => Reason::CtrlDcOffsetIqImbalance,
            Field::Decimation => Reason::CtrlDecimation,
            Field::Agc => Reason::CtrlAgc,
            Field::AdsbMode => Reason::CtrlAdsbMode,
            Field::Rsp1aBiasT => Reason::Rsp1aBiasT,
            Field::Rsp2BiasT => Reason::Rsp2BiasT,
            Field::Rsp2AmPort => Reason::Rsp2AmPortSelect,
            Field::Rsp2Antenna => Reason::Rsp2AntennaControl,
            Field::Rsp2RfNotch => Reason::Rsp2RfNotch,
            Field::RspDuoBiasT => Reason::RspDuoBiasT,
            Field::RspDuoAmPort => Reason::RspDuoAmPortSelect,
            Field::RspDuoTuner1AmNotch => Reason::RspDuoTuner1AmNotch,
            Field::RspDuoRfNotch => Reason::RspDuoRfNotch,
            Field::RspDuoRfDabNotch => Reason::RspDuoRfDabNotch,
            Field::RspDxHdrBw => Reason::RspDxHdrBw,
        }
    }

    /// The single-reason set for this field.
    pub fn encode(self) -> ReasonSet {
        ReasonSet::from(self.reason())
    }
}

impl FromStr for Field {
    type Err = Error;

    fn from_str(path: &str) -> Result<Field> {
        FIELD_PATHS
            .iter()
            .find(|(p, _)| *p == path)
            .map(|(_, f)| *f)
            .ok_or_else(|| Error::UnmappedField(path.to_string()))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Encode a dotted field path into its reason set.
///
/// Read-only fields (such as the observed gain values) and unknown paths
/// fail with [`Error::UnmappedField`]. That is a caller bug, so it is also
/// logged at error level.
pub fn encode(path: &str) -> Result<ReasonSet> {
    match path.parse::<Field>() {
        Ok(field) => Ok(field.encode()),
        Err(e) => {
            error!(path, "no reason-for-update bit for field");
            Err(e)
        }
    }
}
