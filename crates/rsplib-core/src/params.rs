//! Parameter store for a selected device.
//!
//! [`DeviceParams`] is the staging area for every setting the receiver
//! accepts. Setters validate what can be checked statically and either
//! change exactly one [`Field`] (returned so the caller can encode it into a
//! reason set) or fail and leave the store untouched. Nothing reaches the
//! hardware until an update is dispatched for the field's reason.
//!
//! # Shape
//!
//! - One device-level block ([`DevParams`]) with a variant sub-block.
//! - Up to two channel blocks ([`RxChannelParams`]), one per tuner. Which
//!   channels exist depends on the variant and the duo mode:
//!   single-tuner devices have channel A only, an RSPduo in single-tuner
//!   mode has the active tuner only, dual-tuner and master sessions have
//!   both, and a slave session has its own tuner's channel.
//!
//! Fields may be read freely; they can only be changed through the
//! validating setters.

use crate::error::{Error, Result};
use crate::gain::{
    self, GainValues, LnaPath, MinGainReduction, validate_gain_reduction, validate_lna_state,
};
use crate::reason::Field;
use crate::types::{
    AdsbMode, AgcControl, AmPortSelect, Bandwidth, DeviceVariant, DuoMode, FrequencyBand,
    HdrBandwidth, IfType, LoMode, Rsp2Antenna, RspDxAntenna, Tuner, TunerSelect,
};

// ---------------------------------------------------------------
// Limits
// ---------------------------------------------------------------

/// Lowest ADC sample rate in hertz.
pub const MIN_SAMPLE_RATE_HZ: f64 = 2_000_000.0;
/// Highest ADC sample rate in hertz.
pub const MAX_SAMPLE_RATE_HZ: f64 = 10_660_000.0;
/// The two sample rates a shared dual-tuner clock can run at.
pub const DUAL_TUNER_SAMPLE_RATES_HZ: [f64; 2] = [6_000_000.0, 8_000_000.0];
/// Lowest tunable RF frequency in hertz.
pub const MIN_RF_HZ: f64 = 1_000.0;
/// Highest tunable RF frequency in hertz.
pub const MAX_RF_HZ: f64 = 2_000_000_000.0;
/// Largest PPM correction magnitude.
pub const MAX_PPM: f64 = 1000.0;
/// AGC set point bounds in dBFS.
pub const AGC_SETPOINT_RANGE_DBFS: std::ops::RangeInclusive<i32> = -72..=0;
/// Permitted decimation factors.
pub const DECIMATION_FACTORS: [u8; 6] = [1, 2, 4, 8, 16, 32];

/// `true` if `hz` is one of the dual-tuner clock rates.
pub fn is_dual_tuner_rate(hz: f64) -> bool {
    DUAL_TUNER_SAMPLE_RATES_HZ.contains(&hz)
}

/// The IF the hardware requires when a dual-tuner clock runs at `hz`.
pub fn dual_tuner_if(hz: f64) -> IfType {
    if hz == DUAL_TUNER_SAMPLE_RATES_HZ[1] {
        IfType::If2048kHz
    } else {
        IfType::If1620kHz
    }
}

// ---------------------------------------------------------------
// Device-level block
// ---------------------------------------------------------------

/// Sample-number scheduled update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncUpdate {
    pub sample_num: u32,
    pub period: u32,
}

/// One-shot reset requests, cleared once applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResetFlags {
    pub gain: bool,
    pub rf: bool,
    pub fs: bool,
}

/// Which reset to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    Gain,
    Rf,
    SampleRate,
}

/// Device-level settings specific to one variant.
#[derive(Debug, Clone, PartialEq)]
pub enum VariantDevParams {
    Rsp1,
    Rsp1a {
        rf_notch: bool,
        rf_dab_notch: bool,
    },
    Rsp2 {
        ext_ref_output: bool,
    },
    RspDuo {
        ext_ref_output: bool,
    },
    RspDx {
        hdr_enable: bool,
        bias_t: bool,
        antenna: RspDxAntenna,
        rf_notch: bool,
        rf_dab_notch: bool,
    },
}

impl VariantDevParams {
    fn defaults(variant: DeviceVariant) -> Self {
        match variant {
            DeviceVariant::Rsp1 => VariantDevParams::Rsp1,
            DeviceVariant::Rsp1a => VariantDevParams::Rsp1a {
                rf_notch: false,
                rf_dab_notch: false,
            },
            DeviceVariant::Rsp2 => VariantDevParams::Rsp2 {
                ext_ref_output: false,
            },
            DeviceVariant::RspDuo => VariantDevParams::RspDuo {
                ext_ref_output: false,
            },
            DeviceVariant::RspDx => VariantDevParams::RspDx {
                hdr_enable: false,
                bias_t: false,
                antenna: RspDxAntenna::A,
                rf_notch: false,
                rf_dab_notch: false,
            },
        }
    }
}

/// Device-level parameters. Only a master (or non-duo) session may apply
/// changes to these.
#[derive(Debug, Clone, PartialEq)]
pub struct DevParams {
    pub sample_rate_hz: f64,
    pub ppm: f64,
    pub sync_update: SyncUpdate,
    pub reset: ResetFlags,
    pub variant: VariantDevParams,
}

// ---------------------------------------------------------------
// Channel block
// ---------------------------------------------------------------

/// Gain request plus the values the hardware last reported.
#[derive(Debug, Clone, PartialEq)]
pub struct GainParams {
    pub gr_db: u8,
    pub lna_state: u8,
    pub min_gr: MinGainReduction,
    /// Read only; populated after an apply.
    pub observed: Option<GainValues>,
}

/// Tuner DC offset calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DcOffsetTuner {
    /// Calibration mode, 0..=6.
    pub dc_cal: u8,
    /// Speed-up mode, 0..=3.
    pub speed_up: u8,
    /// Tracking time, 1..=63.
    pub track_time: u8,
}

impl Default for DcOffsetTuner {
    fn default() -> Self {
        DcOffsetTuner {
            dc_cal: 3,
            speed_up: 0,
            track_time: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TunerParams {
    pub bandwidth: Bandwidth,
    pub if_type: IfType,
    pub lo_mode: LoMode,
    pub gain: GainParams,
    pub rf_hz: f64,
    pub dc_offset: DcOffsetTuner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimation {
    pub enable: bool,
    pub factor: u8,
    pub wide_band_signal: bool,
}

impl Default for Decimation {
    fn default() -> Self {
        Decimation {
            enable: false,
            factor: 1,
            wide_band_signal: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Agc {
    pub control: AgcControl,
    pub setpoint_dbfs: i32,
    pub attack_ms: u16,
    pub decay_ms: u16,
    pub decay_delay_ms: u16,
    pub decay_threshold_db: u16,
}

impl Default for Agc {
    fn default() -> Self {
        Agc {
            control: AgcControl::Disable,
            setpoint_dbfs: -60,
            attack_ms: 0,
            decay_ms: 0,
            decay_delay_ms: 0,
            decay_threshold_db: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlParams {
    pub dc_offset: bool,
    pub iq_imbalance: bool,
    pub decimation: Decimation,
    pub agc: Agc,
    pub adsb_mode: AdsbMode,
}

/// Per-channel settings specific to one variant.
#[derive(Debug, Clone, PartialEq)]
pub enum VariantTunerParams {
    Rsp1,
    Rsp1a {
        bias_t: bool,
    },
    Rsp2 {
        bias_t: bool,
        am_port: AmPortSelect,
        antenna: Rsp2Antenna,
        rf_notch: bool,
    },
    RspDuo {
        bias_t: bool,
        am_port: AmPortSelect,
        tuner1_am_notch: bool,
        rf_notch: bool,
        rf_dab_notch: bool,
    },
    RspDx {
        hdr_bw: HdrBandwidth,
    },
}

impl VariantTunerParams {
    fn defaults(variant: DeviceVariant) -> Self {
        match variant {
            DeviceVariant::Rsp1 => VariantTunerParams::Rsp1,
            DeviceVariant::Rsp1a => VariantTunerParams::Rsp1a { bias_t: false },
            DeviceVariant::Rsp2 => VariantTunerParams::Rsp2 {
                bias_t: false,
                am_port: AmPortSelect::Port2,
                antenna: Rsp2Antenna::A,
                rf_notch: false,
            },
            DeviceVariant::RspDuo => VariantTunerParams::RspDuo {
                bias_t: false,
                am_port: AmPortSelect::Port2,
                tuner1_am_notch: false,
                rf_notch: false,
                rf_dab_notch: false,
            },
            DeviceVariant::RspDx => VariantTunerParams::RspDx {
                hdr_bw: HdrBandwidth::default(),
            },
        }
    }
}

/// Parameters of one receive channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RxChannelParams {
    pub tuner: TunerParams,
    pub ctrl: ControlParams,
    pub variant: VariantTunerParams,
}

impl RxChannelParams {
    fn defaults(variant: DeviceVariant, dual_clock_hz: Option<f64>) -> Self {
        let (bandwidth, if_type) = match dual_clock_hz {
            Some(hz) => (Bandwidth::Bw1536kHz, dual_tuner_if(hz)),
            None => (Bandwidth::Bw200kHz, IfType::Zero),
        };
        RxChannelParams {
            tuner: TunerParams {
                bandwidth,
                if_type,
                lo_mode: LoMode::Auto,
                gain: GainParams {
                    gr_db: 50,
                    lna_state: 0,
                    min_gr: MinGainReduction::Normal,
                    observed: None,
                },
                rf_hz: 200_000_000.0,
                dc_offset: DcOffsetTuner::default(),
            },
            ctrl: ControlParams {
                dc_offset: true,
                iq_imbalance: true,
                decimation: Decimation::default(),
                agc: Agc::default(),
                adsb_mode: AdsbMode::default(),
            },
            variant: VariantTunerParams::defaults(variant),
        }
    }
}

// ---------------------------------------------------------------
// DeviceParams
// ---------------------------------------------------------------

/// The full parameter tree of a selected device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceParams {
    variant: DeviceVariant,
    mode: DuoMode,
    dev: DevParams,
    rx: [Option<RxChannelParams>; 2],
}

impl DeviceParams {
    /// Default parameters for a device session.
    ///
    /// `tuners` selects the channels of a single-tuner or slave RSPduo
    /// session and is ignored otherwise. `duo_sample_hz` is the shared clock
    /// rate for dual-tuner, master and slave sessions.
    pub fn defaults(
        variant: DeviceVariant,
        mode: DuoMode,
        tuners: TunerSelect,
        duo_sample_hz: f64,
    ) -> Self {
        let mode = if variant.is_duo() { mode } else { DuoMode::Unknown };
        let dual_clock = matches!(mode, DuoMode::Dual | DuoMode::Master | DuoMode::Slave);
        let clock = dual_clock.then_some(duo_sample_hz);
        let channels = match mode {
            DuoMode::Dual | DuoMode::Master => TunerSelect::Both,
            DuoMode::Single | DuoMode::Slave => match tuners {
                TunerSelect::B => TunerSelect::B,
                _ => TunerSelect::A,
            },
            DuoMode::Unknown => TunerSelect::A,
        };
        let rx = [Tuner::A, Tuner::B].map(|t| {
            channels
                .contains(t)
                .then(|| RxChannelParams::defaults(variant, clock))
        });
        DeviceParams {
            variant,
            mode,
            dev: DevParams {
                sample_rate_hz: clock.unwrap_or(MIN_SAMPLE_RATE_HZ),
                ppm: 0.0,
                sync_update: SyncUpdate::default(),
                reset: ResetFlags::default(),
                variant: VariantDevParams::defaults(variant),
            },
            rx,
        }
    }

    pub fn variant(&self) -> DeviceVariant {
        self.variant
    }

    /// The duo mode these parameters were shaped for.
    pub fn mode(&self) -> DuoMode {
        self.mode
    }

    pub fn dev(&self) -> &DevParams {
        &self.dev
    }

    /// The tuners that have a channel block.
    pub fn tuners(&self) -> TunerSelect {
        match (self.rx[0].is_some(), self.rx[1].is_some()) {
            (true, true) => TunerSelect::Both,
            (true, false) => TunerSelect::A,
            (false, true) => TunerSelect::B,
            (false, false) => TunerSelect::Neither,
        }
    }

    pub fn has_channel(&self, tuner: Tuner) -> bool {
        self.rx[tuner.index()].is_some()
    }

    /// The channel block for `tuner`.
    pub fn channel(&self, tuner: Tuner) -> Result<&RxChannelParams> {
        self.rx[tuner.index()]
            .as_ref()
            .ok_or_else(|| self.no_channel(tuner))
    }

    fn channel_mut(&mut self, tuner: Tuner) -> Result<&mut RxChannelParams> {
        let (variant, mode) = (self.variant, self.mode);
        self.rx[tuner.index()]
            .as_mut()
            .ok_or_else(|| no_channel(variant, mode, tuner))
    }

    fn no_channel(&self, tuner: Tuner) -> Error {
        no_channel(self.variant, self.mode, tuner)
    }

    fn unsupported(&self, what: &str) -> Error {
        Error::Unsupported(format!("{what} on {}", self.variant))
    }

    /// The LNA table path currently selected on `tuner`.
    pub fn lna_path(&self, tuner: Tuner) -> LnaPath {
        let hiz = |port: AmPortSelect| {
            if port == AmPortSelect::Port1 {
                LnaPath::HiZ
            } else {
                LnaPath::Standard
            }
        };
        match (&self.dev.variant, self.channel(tuner).map(|c| &c.variant)) {
            (VariantDevParams::RspDx { hdr_enable: true, .. }, _) => LnaPath::Hdr,
            (_, Ok(VariantTunerParams::Rsp2 { am_port, .. })) => hiz(*am_port),
            (_, Ok(VariantTunerParams::RspDuo { am_port, .. })) if tuner == Tuner::A => {
                hiz(*am_port)
            }
            _ => LnaPath::Standard,
        }
    }

    /// Number of LNA states on `tuner` at its current frequency and path.
    pub fn lna_state_count(&self, tuner: Tuner) -> Result<u8> {
        let rf_hz = self.channel(tuner)?.tuner.rf_hz;
        Ok(gain::lna_state_count(
            self.variant,
            FrequencyBand::from_hz(rf_hz),
            self.lna_path(tuner),
        ))
    }

    /// Check `tuner`'s LNA state against the table `path` would select.
    fn check_lna_on_path(&self, tuner: Tuner, path: LnaPath) -> Result<()> {
        let current = &self.channel(tuner)?.tuner;
        validate_lna_state(
            current.gain.lna_state,
            self.variant,
            FrequencyBand::from_hz(current.rf_hz),
            path,
        )
    }

    // -----------------------------------------------------------
    // Device-level setters
    // -----------------------------------------------------------

    /// Set the ADC sample rate.
    ///
    /// With a shared dual-tuner clock the rate is paired with both channels'
    /// IF, so it can only be moved through `swap_sample_rate`. Re-staging the
    /// current rate is accepted.
    pub fn set_sample_rate(&mut self, hz: f64) -> Result<Field> {
        if !(MIN_SAMPLE_RATE_HZ..=MAX_SAMPLE_RATE_HZ).contains(&hz) {
            return Err(Error::OutOfRange(format!(
                "sample rate {hz} Hz outside {MIN_SAMPLE_RATE_HZ}..={MAX_SAMPLE_RATE_HZ} Hz"
            )));
        }
        if self.mode.is_dual_clock() && hz != self.dev.sample_rate_hz {
            return Err(Error::InvalidParameter(format!(
                "sample rate {hz} Hz: the shared dual-tuner clock ({} Hz) \
                 is moved with swap_sample_rate",
                self.dev.sample_rate_hz
            )));
        }
        self.dev.sample_rate_hz = hz;
        Ok(Field::SampleRate)
    }

    pub fn set_ppm(&mut self, ppm: f64) -> Result<Field> {
        if !ppm.is_finite() || ppm.abs() > MAX_PPM {
            return Err(Error::OutOfRange(format!(
                "PPM correction {ppm} exceeds +/-{MAX_PPM}"
            )));
        }
        self.dev.ppm = ppm;
        Ok(Field::Ppm)
    }

    pub fn set_sync_update(&mut self, sample_num: u32, period: u32) -> Result<Field> {
        self.dev.sync_update = SyncUpdate { sample_num, period };
        Ok(Field::SyncUpdate)
    }

    /// Request a one-shot reset of gain, RF or sample-rate updates.
    pub fn request_reset(&mut self, kind: ResetKind) -> Result<Field> {
        Ok(match kind {
            ResetKind::Gain => {
                self.dev.reset.gain = true;
                Field::ResetGain
            }
            ResetKind::Rf => {
                self.dev.reset.rf = true;
                Field::ResetRf
            }
            ResetKind::SampleRate => {
                self.dev.reset.fs = true;
                Field::ResetFs
            }
        })
    }

    /// Clear reset requests once they have been applied.
    pub fn clear_reset_flags(&mut self) {
        self.dev.reset = ResetFlags::default();
    }

    /// Enable the reference clock output (RSP2 and RSPduo).
    pub fn set_ext_ref_output(&mut self, enable: bool) -> Result<Field> {
        match &mut self.dev.variant {
            VariantDevParams::Rsp2 { ext_ref_output } => {
                *ext_ref_output = enable;
                Ok(Field::Rsp2ExtRef)
            }
            VariantDevParams::RspDuo { ext_ref_output } => {
                *ext_ref_output = enable;
                Ok(Field::RspDuoExtRef)
            }
            _ => Err(self.unsupported("reference clock output")),
        }
    }

    /// Enable RSPdx HDR mode.
    ///
    /// Fails if a channel's LNA state has no meaning on the resulting path.
    pub fn set_hdr_enable(&mut self, enable: bool) -> Result<Field> {
        if !matches!(self.dev.variant, VariantDevParams::RspDx { .. }) {
            return Err(self.unsupported("HDR mode"));
        }
        let path = if enable { LnaPath::Hdr } else { LnaPath::Standard };
        for tuner in self.tuners().tuners() {
            self.check_lna_on_path(tuner, path)?;
        }
        if let VariantDevParams::RspDx { hdr_enable, .. } = &mut self.dev.variant {
            *hdr_enable = enable;
        }
        Ok(Field::RspDxHdrEnable)
    }

    /// Select the RSPdx antenna input.
    pub fn set_rspdx_antenna(&mut self, input: RspDxAntenna) -> Result<Field> {
        match &mut self.dev.variant {
            VariantDevParams::RspDx { antenna, .. } => {
                *antenna = input;
                Ok(Field::RspDxAntenna)
            }
            _ => Err(self.unsupported("RSPdx antenna selection")),
        }
    }

    // -----------------------------------------------------------
    // Tuner setters
    // -----------------------------------------------------------

    /// Set gain reduction and LNA state together.
    pub fn set_gain(&mut self, tuner: Tuner, gr_db: u8, lna_state: u8) -> Result<Field> {
        let current = &self.channel(tuner)?.tuner;
        let band = FrequencyBand::from_hz(current.rf_hz);
        validate_gain_reduction(gr_db, current.gain.min_gr)?;
        validate_lna_state(lna_state, self.variant, band, self.lna_path(tuner))?;
        let gain = &mut self.channel_mut(tuner)?.tuner.gain;
        gain.gr_db = gr_db;
        gain.lna_state = lna_state;
        Ok(Field::GainReduction)
    }

    /// Change the minimum gain reduction mode.
    ///
    /// Fails if the current gain reduction would fall below the new floor.
    pub fn set_min_gain_reduction(&mut self, tuner: Tuner, min_gr: MinGainReduction) -> Result<Field> {
        let gr_db = self.channel(tuner)?.tuner.gain.gr_db;
        validate_gain_reduction(gr_db, min_gr)?;
        self.channel_mut(tuner)?.tuner.gain.min_gr = min_gr;
        Ok(Field::MinGainReduction)
    }

    /// Record the gain values the hardware reported after an apply.
    pub fn record_gain_values(&mut self, tuner: Tuner, values: GainValues) -> Result<()> {
        self.channel_mut(tuner)?.tuner.gain.observed = Some(values);
        Ok(())
    }

    /// Tune `tuner` to `rf_hz`.
    ///
    /// Fails if the current LNA state has no meaning on the new band.
    pub fn set_rf_frequency(&mut self, tuner: Tuner, rf_hz: f64) -> Result<Field> {
        if !(MIN_RF_HZ..=MAX_RF_HZ).contains(&rf_hz) {
            return Err(Error::OutOfRange(format!(
                "RF frequency {rf_hz} Hz outside {MIN_RF_HZ}..={MAX_RF_HZ} Hz"
            )));
        }
        let lna_state = self.channel(tuner)?.tuner.gain.lna_state;
        validate_lna_state(
            lna_state,
            self.variant,
            FrequencyBand::from_hz(rf_hz),
            self.lna_path(tuner),
        )?;
        self.channel_mut(tuner)?.tuner.rf_hz = rf_hz;
        Ok(Field::RfFrequency)
    }

    pub fn set_bandwidth(&mut self, tuner: Tuner, bandwidth: Bandwidth) -> Result<Field> {
        self.channel_mut(tuner)?.tuner.bandwidth = bandwidth;
        Ok(Field::Bandwidth)
    }

    pub fn set_if_type(&mut self, tuner: Tuner, if_type: IfType) -> Result<Field> {
        self.channel_mut(tuner)?.tuner.if_type = if_type;
        Ok(Field::IfType)
    }

    pub fn set_lo_mode(&mut self, tuner: Tuner, lo_mode: LoMode) -> Result<Field> {
        self.channel_mut(tuner)?.tuner.lo_mode = lo_mode;
        Ok(Field::LoMode)
    }

    pub fn set_tuner_dc_offset(&mut self, tuner: Tuner, dc: DcOffsetTuner) -> Result<Field> {
        if dc.dc_cal > 6 || dc.speed_up > 3 || !(1..=63).contains(&dc.track_time) {
            return Err(Error::OutOfRange(format!("tuner DC offset settings {dc:?}")));
        }
        self.channel_mut(tuner)?.tuner.dc_offset = dc;
        Ok(Field::TunerDcOffset)
    }

    // -----------------------------------------------------------
    // Control setters
    // -----------------------------------------------------------

    pub fn set_dc_offset_correction(&mut self, tuner: Tuner, enable: bool) -> Result<Field> {
        self.channel_mut(tuner)?.ctrl.dc_offset = enable;
        Ok(Field::CtrlDcOffset)
    }

    pub fn set_iq_imbalance_correction(&mut self, tuner: Tuner, enable: bool) -> Result<Field> {
        self.channel_mut(tuner)?.ctrl.iq_imbalance = enable;
        Ok(Field::CtrlIqImbalance)
    }

    /// Configure decimation. A factor of 1 disables it.
    pub fn set_decimation(&mut self, tuner: Tuner, factor: u8, wide_band_signal: bool) -> Result<Field> {
        if !DECIMATION_FACTORS.contains(&factor) {
            return Err(Error::InvalidParameter(format!(
                "decimation factor {factor} not one of {DECIMATION_FACTORS:?}"
            )));
        }
        self.channel_mut(tuner)?.ctrl.decimation = Decimation {
            enable: factor > 1,
            factor,
            wide_band_signal,
        };
        Ok(Field::Decimation)
    }

    pub fn set_agc(&mut self, tuner: Tuner, agc: Agc) -> Result<Field> {
        if !AGC_SETPOINT_RANGE_DBFS.contains(&agc.setpoint_dbfs) {
            return Err(Error::OutOfRange(format!(
                "AGC set point {} dBFS outside {:?}",
                agc.setpoint_dbfs, AGC_SETPOINT_RANGE_DBFS
            )));
        }
        self.channel_mut(tuner)?.ctrl.agc = agc;
        Ok(Field::Agc)
    }

    pub fn set_adsb_mode(&mut self, tuner: Tuner, mode: AdsbMode) -> Result<Field> {
        self.channel_mut(tuner)?.ctrl.adsb_mode = mode;
        Ok(Field::AdsbMode)
    }

    // -----------------------------------------------------------
    // Variant setters
    // -----------------------------------------------------------

    /// Switch the bias-T supply.
    pub fn set_bias_t(&mut self, tuner: Tuner, enable: bool) -> Result<Field> {
        if let VariantDevParams::RspDx { bias_t, .. } = &mut self.dev.variant {
            *bias_t = enable;
            return Ok(Field::RspDxBiasT);
        }
        let unsupported = self.unsupported("bias-T");
        match &mut self.channel_mut(tuner)?.variant {
            VariantTunerParams::Rsp1a { bias_t } => {
                *bias_t = enable;
                Ok(Field::Rsp1aBiasT)
            }
            VariantTunerParams::Rsp2 { bias_t, .. } => {
                *bias_t = enable;
                Ok(Field::Rsp2BiasT)
            }
            VariantTunerParams::RspDuo { bias_t, .. } => {
                *bias_t = enable;
                Ok(Field::RspDuoBiasT)
            }
            _ => Err(unsupported),
        }
    }

    /// Switch the broadcast FM notch filter.
    pub fn set_rf_notch(&mut self, tuner: Tuner, enable: bool) -> Result<Field> {
        match &mut self.dev.variant {
            VariantDevParams::Rsp1a { rf_notch, .. } => {
                *rf_notch = enable;
                return Ok(Field::Rsp1aRfNotch);
            }
            VariantDevParams::RspDx { rf_notch, .. } => {
                *rf_notch = enable;
                return Ok(Field::RspDxRfNotch);
            }
            _ => {}
        }
        let unsupported = self.unsupported("RF notch");
        match &mut self.channel_mut(tuner)?.variant {
            VariantTunerParams::Rsp2 { rf_notch, .. } => {
                *rf_notch = enable;
                Ok(Field::Rsp2RfNotch)
            }
            VariantTunerParams::RspDuo { rf_notch, .. } => {
                *rf_notch = enable;
                Ok(Field::RspDuoRfNotch)
            }
            _ => Err(unsupported),
        }
    }

    /// Switch the DAB notch filter.
    pub fn set_dab_notch(&mut self, tuner: Tuner, enable: bool) -> Result<Field> {
        match &mut self.dev.variant {
            VariantDevParams::Rsp1a { rf_dab_notch, .. } => {
                *rf_dab_notch = enable;
                return Ok(Field::Rsp1aRfDabNotch);
            }
            VariantDevParams::RspDx { rf_dab_notch, .. } => {
                *rf_dab_notch = enable;
                return Ok(Field::RspDxRfDabNotch);
            }
            _ => {}
        }
        let unsupported = self.unsupported("DAB notch");
        match &mut self.channel_mut(tuner)?.variant {
            VariantTunerParams::RspDuo { rf_dab_notch, .. } => {
                *rf_dab_notch = enable;
                Ok(Field::RspDuoRfDabNotch)
            }
            _ => Err(unsupported),
        }
    }

    /// Select the AM (HiZ) port.
    ///
    /// On the RSPduo only tuner A has the HiZ port. Fails if the current LNA
    /// state has no meaning on the new port's table.
    pub fn set_am_port(&mut self, tuner: Tuner, port: AmPortSelect) -> Result<Field> {
        let field = match &self.channel(tuner)?.variant {
            VariantTunerParams::Rsp2 { .. } => Field::Rsp2AmPort,
            VariantTunerParams::RspDuo { .. } => {
                if tuner == Tuner::B && port == AmPortSelect::Port1 {
                    return Err(Error::InvalidParameter(format!(
                        "{} tuner B has no HiZ port",
                        self.variant
                    )));
                }
                Field::RspDuoAmPort
            }
            _ => return Err(self.unsupported("AM port selection")),
        };
        let path = match port {
            AmPortSelect::Port1 => LnaPath::HiZ,
            _ => LnaPath::Standard,
        };
        self.check_lna_on_path(tuner, path)?;
        match &mut self.channel_mut(tuner)?.variant {
            VariantTunerParams::Rsp2 { am_port, .. }
            | VariantTunerParams::RspDuo { am_port, .. } => *am_port = port,
            _ => {}
        }
        Ok(field)
    }

    /// Select the RSP2 antenna input.
    pub fn set_rsp2_antenna(&mut self, tuner: Tuner, input: Rsp2Antenna) -> Result<Field> {
        let unsupported = self.unsupported("RSP2 antenna selection");
        match &mut self.channel_mut(tuner)?.variant {
            VariantTunerParams::Rsp2 { antenna, .. } => {
                *antenna = input;
                Ok(Field::Rsp2Antenna)
            }
            _ => Err(unsupported),
        }
    }

    /// Switch the RSPduo tuner 1 AM notch.
    pub fn set_tuner1_am_notch(&mut self, tuner: Tuner, enable: bool) -> Result<Field> {
        let unsupported = self.unsupported("tuner 1 AM notch");
        match &mut self.channel_mut(tuner)?.variant {
            VariantTunerParams::RspDuo {
                tuner1_am_notch, ..
            } => {
                *tuner1_am_notch = enable;
                Ok(Field::RspDuoTuner1AmNotch)
            }
            _ => Err(unsupported),
        }
    }

    /// Select the RSPdx HDR bandwidth.
    pub fn set_hdr_bandwidth(&mut self, tuner: Tuner, bw: HdrBandwidth) -> Result<Field> {
        let unsupported = self.unsupported("HDR bandwidth");
        match &mut self.channel_mut(tuner)?.variant {
            VariantTunerParams::RspDx { hdr_bw } => {
                *hdr_bw = bw;
                Ok(Field::RspDxHdrBw)
            }
            _ => Err(unsupported),
        }
    }

    // -----------------------------------------------------------
    // Dual-tuner clock
    // -----------------------------------------------------------

    /// Move the shared dual-tuner clock to `hz`, retuning the IF of both
    /// channels to match. Only valid with a dual-tuner clock.
    pub fn set_dual_tuner_rate(&mut self, hz: f64) -> Result<()> {
        if !self.mode.is_dual_clock() {
            return Err(Error::InvalidParameter(format!(
                "no shared sample clock in {} mode",
                self.mode
            )));
        }
        if !is_dual_tuner_rate(hz) {
            return Err(Error::InvalidParameter(format!(
                "dual-tuner sample rate must be one of {DUAL_TUNER_SAMPLE_RATES_HZ:?}, got {hz}"
            )));
        }
        self.dev.sample_rate_hz = hz;
        for rx in self.rx.iter_mut().flatten() {
            rx.tuner.if_type = dual_tuner_if(hz);
        }
        Ok(())
    }
}

fn no_channel(variant: DeviceVariant, mode: DuoMode, tuner: Tuner) -> Error {
    Error::InvalidParameter(format!(
        "tuner {tuner} has no channel in {variant} {mode} mode"
    ))
}
