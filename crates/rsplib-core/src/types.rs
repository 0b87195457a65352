//! Core data types used throughout rsplib.
//!
//! These types represent device identity, tuner selection, duo-mode state,
//! and the enumerated settings that the receiver family understands. They
//! are manufacturer-specific in value but backend-agnostic in shape: any
//! [`Transport`](crate::transport::Transport) implementation speaks them.

use std::fmt;

// ---------------------------------------------------------------
// Limits
// ---------------------------------------------------------------

/// Upper bound on the number of devices a single enumeration returns.
pub const MAX_DEVICES: usize = 16;

/// Number of logical tuners on the widest device (the RSPduo).
pub const MAX_TUNERS: usize = 2;

// ---------------------------------------------------------------
// Tuners and duo mode
// ---------------------------------------------------------------

/// A single logical tuner (and its stream channel).
///
/// Channel A is always fed by tuner A and channel B by tuner B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tuner {
    A,
    B,
}

impl Tuner {
    /// Zero-based index, for per-channel tables.
    pub fn index(self) -> usize {
        match self {
            Tuner::A => 0,
            Tuner::B => 1,
        }
    }

    /// The other tuner of a dual-tuner device.
    pub fn other(self) -> Tuner {
        match self {
            Tuner::A => Tuner::B,
            Tuner::B => Tuner::A,
        }
    }
}

impl fmt::Display for Tuner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tuner::A => write!(f, "A"),
            Tuner::B => write!(f, "B"),
        }
    }
}

/// Which tuners a device (or a session on it) owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TunerSelect {
    #[default]
    Neither = 0,
    A = 1,
    B = 2,
    Both = 3,
}

impl TunerSelect {
    /// `true` if `tuner` is part of this selection.
    pub fn contains(self, tuner: Tuner) -> bool {
        match (self, tuner) {
            (TunerSelect::Both, _) => true,
            (TunerSelect::A, Tuner::A) | (TunerSelect::B, Tuner::B) => true,
            _ => false,
        }
    }

    /// Iterate the tuners in this selection, A first.
    pub fn tuners(self) -> impl Iterator<Item = Tuner> {
        [Tuner::A, Tuner::B]
            .into_iter()
            .filter(move |t| self.contains(*t))
    }
}

impl From<Tuner> for TunerSelect {
    fn from(tuner: Tuner) -> Self {
        match tuner {
            Tuner::A => TunerSelect::A,
            Tuner::B => TunerSelect::B,
        }
    }
}

/// Operating mode of a dual-tuner device, or the role a session holds on it.
///
/// The discriminants are the service's bit values, so a device advertising
/// several available modes can carry them as a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DuoMode {
    #[default]
    Unknown = 0,
    Single = 1,
    Dual = 2,
    Master = 4,
    Slave = 8,
}

impl DuoMode {
    /// `true` for modes in which both tuners stream from one sample clock.
    pub fn is_dual_clock(self) -> bool {
        matches!(self, DuoMode::Dual | DuoMode::Master)
    }
}

impl fmt::Display for DuoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DuoMode::Unknown => "unknown",
            DuoMode::Single => "single",
            DuoMode::Dual => "dual",
            DuoMode::Master => "master",
            DuoMode::Slave => "slave",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------
// Device identity
// ---------------------------------------------------------------

/// Member of the receiver family, keyed by hardware version id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceVariant {
    Rsp1,
    Rsp1a,
    Rsp2,
    RspDuo,
    RspDx,
}

impl DeviceVariant {
    /// Map a hardware version id to a variant.
    pub fn from_hw_ver(hw_ver: u8) -> Option<DeviceVariant> {
        match hw_ver {
            1 => Some(DeviceVariant::Rsp1),
            255 => Some(DeviceVariant::Rsp1a),
            2 => Some(DeviceVariant::Rsp2),
            3 => Some(DeviceVariant::RspDuo),
            4 => Some(DeviceVariant::RspDx),
            _ => None,
        }
    }

    /// The hardware version id reported by the service.
    pub fn hw_ver(self) -> u8 {
        match self {
            DeviceVariant::Rsp1 => 1,
            DeviceVariant::Rsp1a => 255,
            DeviceVariant::Rsp2 => 2,
            DeviceVariant::RspDuo => 3,
            DeviceVariant::RspDx => 4,
        }
    }

    /// `true` for the two-tuner RSPduo.
    pub fn is_duo(self) -> bool {
        self == DeviceVariant::RspDuo
    }
}

impl fmt::Display for DeviceVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceVariant::Rsp1 => "RSP1",
            DeviceVariant::Rsp1a => "RSP1A",
            DeviceVariant::Rsp2 => "RSP2",
            DeviceVariant::RspDuo => "RSPduo",
            DeviceVariant::RspDx => "RSPdx",
        };
        f.write_str(name)
    }
}

/// Opaque handle the transport assigns to a selected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u64);

/// A device as reported by enumeration, and the selection request for it.
///
/// For an RSPduo the caller fills in `tuners`, `duo_mode` and
/// `duo_sample_freq` before selecting to choose the session's role.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    /// Serial number.
    pub serial: String,
    /// Hardware version id (see [`DeviceVariant::from_hw_ver`]).
    pub hw_ver: u8,
    /// Tuners available (enumeration) or requested (selection).
    pub tuners: TunerSelect,
    /// Duo mode available (enumeration) or requested (selection).
    pub duo_mode: DuoMode,
    /// Master sample rate when joining an existing master as slave.
    pub duo_sample_freq: f64,
    /// `false` once the device has been removed.
    pub valid: bool,
    /// Transport handle, set by selection.
    pub handle: Option<DeviceHandle>,
}

impl DeviceInfo {
    /// The variant this device belongs to, if the hardware id is known.
    pub fn variant(&self) -> Option<DeviceVariant> {
        DeviceVariant::from_hw_ver(self.hw_ver)
    }
}

/// Service API version, e.g. `3.08`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ApiVersion {
    pub major: u8,
    pub minor: u8,
}

impl ApiVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        ApiVersion { major, minor }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.major, self.minor)
    }
}

/// Verbosity of the service's own debug output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DebugLevel {
    #[default]
    Disable,
    Verbose,
    Warning,
    Error,
    Message,
}

// ---------------------------------------------------------------
// Tuner settings
// ---------------------------------------------------------------

/// IF bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Bandwidth {
    #[default]
    Bw200kHz,
    Bw300kHz,
    Bw600kHz,
    Bw1536kHz,
    Bw5000kHz,
    Bw6000kHz,
    Bw7000kHz,
    Bw8000kHz,
}

impl Bandwidth {
    /// Nominal bandwidth in kilohertz.
    pub fn khz(self) -> u32 {
        match self {
            Bandwidth::Bw200kHz => 200,
            Bandwidth::Bw300kHz => 300,
            Bandwidth::Bw600kHz => 600,
            Bandwidth::Bw1536kHz => 1536,
            Bandwidth::Bw5000kHz => 5000,
            Bandwidth::Bw6000kHz => 6000,
            Bandwidth::Bw7000kHz => 7000,
            Bandwidth::Bw8000kHz => 8000,
        }
    }
}

/// Intermediate frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IfType {
    #[default]
    Zero,
    If450kHz,
    If1620kHz,
    If2048kHz,
}

/// Local oscillator mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoMode {
    #[default]
    Auto,
    Lo120MHz,
    Lo144MHz,
    Lo168MHz,
}

/// AGC loop bandwidth, or disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AgcControl {
    #[default]
    Disable,
    Hz100,
    Hz50,
    Hz5,
    Enable,
}

/// AM port selection on the RSP2 and RSPduo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AmPortSelect {
    #[default]
    Port2 = 0,
    Port1 = 1,
}

/// ADS-B decimation mode of the control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AdsbMode {
    #[default]
    DecimationEnabled,
    NoDecimationLowpass,
    NoDecimationBandpass2MHz,
    NoDecimationBandpass3MHz,
}

/// RSP2 antenna input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rsp2Antenna {
    #[default]
    A,
    B,
}

/// RSPdx antenna input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RspDxAntenna {
    #[default]
    A,
    B,
    C,
}

/// RSPdx HDR mode bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HdrBandwidth {
    Bw200kHz,
    Bw500kHz,
    Bw1200kHz,
    #[default]
    Bw1700kHz,
}

/// RF frequency bands used by the LNA state tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrequencyBand {
    /// 0-12 MHz
    Band0To12,
    /// 12-60 MHz
    Band12To60,
    /// 60-250 MHz
    Band60To250,
    /// 250-420 MHz
    Band250To420,
    /// 420-1000 MHz
    Band420To1000,
    /// 1000-2000 MHz
    Band1000To2000,
}

impl FrequencyBand {
    /// The band containing `rf_hz`; frequencies above 2 GHz fall in the top band.
    pub fn from_hz(rf_hz: f64) -> FrequencyBand {
        let mhz = rf_hz / 1e6;
        if mhz < 12.0 {
            FrequencyBand::Band0To12
        } else if mhz < 60.0 {
            FrequencyBand::Band12To60
        } else if mhz < 250.0 {
            FrequencyBand::Band60To250
        } else if mhz < 420.0 {
            FrequencyBand::Band250To420
        } else if mhz < 1000.0 {
            FrequencyBand::Band420To1000
        } else {
            FrequencyBand::Band1000To2000
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuner_select_contains() {
        assert!(TunerSelect::Both.contains(Tuner::A));
        assert!(TunerSelect::Both.contains(Tuner::B));
        assert!(TunerSelect::A.contains(Tuner::A));
        assert!(!TunerSelect::A.contains(Tuner::B));
        assert!(!TunerSelect::Neither.contains(Tuner::A));
    }

    #[test]
    fn tuner_select_iterates_in_order() {
        let all: Vec<Tuner> = TunerSelect::Both.tuners().collect();
        assert_eq!(all, vec![Tuner::A, Tuner::B]);
        assert_eq!(TunerSelect::Neither.tuners().count(), 0);
    }

    #[test]
    fn variant_hw_ver_mapping() {
        assert_eq!(DeviceVariant::from_hw_ver(255), Some(DeviceVariant::Rsp1a));
        assert_eq!(DeviceVariant::from_hw_ver(3), Some(DeviceVariant::RspDuo));
        assert_eq!(DeviceVariant::from_hw_ver(9), None);
        for v in [
            DeviceVariant::Rsp1,
            DeviceVariant::Rsp1a,
            DeviceVariant::Rsp2,
            DeviceVariant::RspDuo,
            DeviceVariant::RspDx,
        ] {
            assert_eq!(DeviceVariant::from_hw_ver(v.hw_ver()), Some(v));
        }
    }

    #[test]
    fn api_version_ordering_and_display() {
        assert!(ApiVersion::new(3, 7) < ApiVersion::new(3, 8));
        assert_eq!(ApiVersion::new(3, 8).to_string(), "3.08");
    }

    #[test]
    fn frequency_band_edges() {
        assert_eq!(FrequencyBand::from_hz(7_100_000.0), FrequencyBand::Band0To12);
        assert_eq!(FrequencyBand::from_hz(12_000_000.0), FrequencyBand::Band12To60);
        assert_eq!(FrequencyBand::from_hz(100e6), FrequencyBand::Band60To250);
        assert_eq!(FrequencyBand::from_hz(433.92e6), FrequencyBand::Band420To1000);
        assert_eq!(FrequencyBand::from_hz(1.09e9), FrequencyBand::Band1000To2000);
    }

    #[test]
    fn duo_mode_display() {
        assert_eq!(DuoMode::Slave.to_string(), "slave");
        assert!(DuoMode::Master.is_dual_clock());
        assert!(!DuoMode::Single.is_dual_clock());
    }
}
