//! Gain reduction limits and LNA state tables.
//!
//! Gain is requested as a pair: an IF gain reduction in dB and a discrete
//! LNA state index. The valid LNA range depends on the receiver variant, the
//! RF band, and two special input paths (the HiZ port on the RSP2/RSPduo and
//! HDR mode on the RSPdx).

use crate::error::{Error, Result};
use crate::types::{DeviceVariant, FrequencyBand};

/// Largest gain reduction the tuner accepts, in dB.
pub const MAX_GAIN_REDUCTION_DB: u8 = 59;

/// Minimum gain reduction mode, which sets the floor of the gain range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MinGainReduction {
    /// Full range, down to 0 dB.
    Extended = 0,
    /// Floor of 20 dB.
    #[default]
    Normal = 20,
}

impl MinGainReduction {
    /// Lowest permitted gain reduction in this mode, in dB.
    pub fn floor_db(self) -> u8 {
        self as u8
    }
}

/// The gain values observed by the hardware after an apply.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GainValues {
    pub curr: f32,
    pub max: f32,
    pub min: f32,
}

/// Which input path the LNA table is selected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LnaPath {
    #[default]
    Standard,
    /// HiZ port of the RSP2 and RSPduo (below 60 MHz).
    HiZ,
    /// RSPdx HDR mode (lowest band).
    Hdr,
}

/// Number of LNA states for a variant on a band.
///
/// Special paths only exist on the bands their hardware covers; elsewhere
/// the standard table applies.
pub fn lna_state_count(variant: DeviceVariant, band: FrequencyBand, path: LnaPath) -> u8 {
    const RSP1: [u8; 6] = [4, 4, 4, 4, 4, 4];
    const RSP1A: [u8; 6] = [7, 10, 10, 10, 10, 9];
    const RSP2: [u8; 6] = [9, 9, 9, 9, 6, 5];
    const RSPDX: [u8; 6] = [19, 27, 27, 28, 21, 19];
    const HIZ: u8 = 5;
    const HDR: u8 = 19;

    let low_band = matches!(
        band,
        FrequencyBand::Band0To12 | FrequencyBand::Band12To60
    );
    match (variant, path) {
        (DeviceVariant::Rsp2 | DeviceVariant::RspDuo, LnaPath::HiZ) if low_band => HIZ,
        (DeviceVariant::RspDx, LnaPath::Hdr) if band == FrequencyBand::Band0To12 => HDR,
        (DeviceVariant::Rsp1, _) => RSP1[band.index()],
        (DeviceVariant::Rsp1a | DeviceVariant::RspDuo, _) => RSP1A[band.index()],
        (DeviceVariant::Rsp2, _) => RSP2[band.index()],
        (DeviceVariant::RspDx, _) => RSPDX[band.index()],
    }
}

/// Check a gain reduction against the floor of `min_gr` and the ceiling.
pub fn validate_gain_reduction(gr_db: u8, min_gr: MinGainReduction) -> Result<()> {
    let floor = min_gr.floor_db();
    if gr_db < floor || gr_db > MAX_GAIN_REDUCTION_DB {
        return Err(Error::InvalidParameter(format!(
            "gain reduction {gr_db} dB outside {floor}..={MAX_GAIN_REDUCTION_DB} dB"
        )));
    }
    Ok(())
}

/// Check an LNA state index against the table for its context.
pub fn validate_lna_state(
    lna_state: u8,
    variant: DeviceVariant,
    band: FrequencyBand,
    path: LnaPath,
) -> Result<()> {
    let count = lna_state_count(variant, band, path);
    if lna_state >= count {
        return Err(Error::InvalidParameter(format!(
            "LNA state {lna_state} invalid for {variant} ({count} states on this band)"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn lna_counts_per_variant() {
        let b = FrequencyBand::Band60To250;
        assert_eq!(lna_state_count(DeviceVariant::Rsp1, b, LnaPath::Standard), 4);
        assert_eq!(lna_state_count(DeviceVariant::Rsp1a, b, LnaPath::Standard), 10);
        assert_eq!(lna_state_count(DeviceVariant::Rsp2, b, LnaPath::Standard), 9);
        assert_eq!(lna_state_count(DeviceVariant::RspDuo, b, LnaPath::Standard), 10);
        assert_eq!(lna_state_count(DeviceVariant::RspDx, b, LnaPath::Standard), 27);
        assert_eq!(
            lna_state_count(DeviceVariant::RspDx, FrequencyBand::Band250To420, LnaPath::Standard),
            28
        );
    }

    #[test]
    fn special_paths_only_on_low_bands() {
        let low = FrequencyBand::Band0To12;
        let high = FrequencyBand::Band420To1000;
        assert_eq!(lna_state_count(DeviceVariant::Rsp2, low, LnaPath::HiZ), 5);
        assert_eq!(lna_state_count(DeviceVariant::Rsp2, high, LnaPath::HiZ), 6);
        assert_eq!(lna_state_count(DeviceVariant::RspDx, low, LnaPath::Hdr), 19);
        assert_eq!(
            lna_state_count(DeviceVariant::RspDx, FrequencyBand::Band12To60, LnaPath::Hdr),
            27
        );
        // HiZ has no meaning on an RSP1A.
        assert_eq!(lna_state_count(DeviceVariant::Rsp1a, low, LnaPath::HiZ), 7);
    }

    #[test]
    fn gain_floor_per_mode() {
        assert!(validate_gain_reduction(20, MinGainReduction::Normal).is_ok());
        assert!(validate_gain_reduction(19, MinGainReduction::Normal).is_err());
        assert!(validate_gain_reduction(0, MinGainReduction::Extended).is_ok());
        assert!(validate_gain_reduction(60, MinGainReduction::Extended).is_err());
    }

    proptest! {
        #[test]
        fn gain_accepted_iff_in_range(gr in 0u8..=255, extended in any::<bool>()) {
            let mode = if extended { MinGainReduction::Extended } else { MinGainReduction::Normal };
            let ok = validate_gain_reduction(gr, mode).is_ok();
            prop_assert_eq!(ok, gr >= mode.floor_db() && gr <= MAX_GAIN_REDUCTION_DB);
        }

        #[test]
        fn lna_accepted_iff_below_count(state in 0u8..40, rf_mhz in 1u32..2000) {
            let band = FrequencyBand::from_hz(f64::from(rf_mhz) * 1e6);
            let count = lna_state_count(DeviceVariant::RspDx, band, LnaPath::Standard);
            let ok = validate_lna_state(state, DeviceVariant::RspDx, band, LnaPath::Standard).is_ok();
            prop_assert_eq!(ok, state < count);
        }
    }
}
