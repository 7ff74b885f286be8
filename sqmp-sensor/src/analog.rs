//! Conversions from raw ADC counts to physical units for the analog
//! probes, assuming a 10-bit converter against a 5 V reference.

/// Counts per full scale of the 10-bit ADC
pub const ADC_FULL_SCALE: f64 = 1024.0;
pub const ADC_REFERENCE_V: f64 = 5.0;

/// A single ended analog channel yielding raw counts (0..=1023)
pub trait AnalogInput {
    type Error: core::fmt::Debug;

    fn read_counts(&mut self) -> Result<u16, Self::Error>;
}

pub fn counts_to_volts(counts: f64) -> f64 {
    counts * ADC_REFERENCE_V / ADC_FULL_SCALE
}

pub fn counts_to_millivolts(counts: u16) -> f32 {
    (counts as f64 / ADC_FULL_SCALE * ADC_REFERENCE_V * 1000.0) as f32
}

/// Linear pH transfer of the analog pH meter board
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhProbe {
    pub slope: f32,
    /// Deviation compensation, found by measuring a pH 7 buffer
    pub offset: f32,
}

impl Default for PhProbe {
    fn default() -> Self {
        Self {
            slope: 3.5,
            offset: 0.0,
        }
    }
}

impl PhProbe {
    pub fn ph(&self, volts: f64) -> f32 {
        (self.slope as f64 * volts + self.offset as f64) as f32
    }
}

/// Capacitive soil moisture probe, calibrated by recording the raw
/// value in open air (dry) and submerged in water (wet)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoilCalibration {
    pub air: i32,
    pub water: i32,
}

impl Default for SoilCalibration {
    fn default() -> Self {
        Self { air: 570, water: 0 }
    }
}

impl SoilCalibration {
    /// Linear integer rescale of `raw` from air..water onto 0..100,
    /// unclamped
    pub fn map(&self, raw: i32) -> i32 {
        let span = self.water - self.air;
        if span == 0 {
            return 0;
        }
        (raw - self.air) * 100 / span
    }

    pub fn percent(&self, raw: i32) -> u8 {
        self.map(raw).clamp(0, 100) as u8
    }
}

/// Conductivity calibration boundary: millivolts at the probe plus
/// solution temperature in, conductivity in mS/cm out.
pub trait EcCalibration {
    fn read_ec(&mut self, millivolts: f32, temperature_c: f32) -> f32;
}

/// K-value calibration of the analog EC meter board. Separate cell
/// constants are kept for the low and high conductivity ranges; the
/// active one switches up above 2.5 mS/cm and back down below 2.0, and
/// is held in between.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KValueCalibration {
    k_low: f32,
    k_high: f32,
    k: f32,
}

impl Default for KValueCalibration {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

impl KValueCalibration {
    const RES2: f32 = 820.0;
    const EC_REF: f32 = 200.0;
    const TEMP_COEFFICIENT: f32 = 0.0185;
    const SWITCH_UP: f32 = 2.5;
    const SWITCH_DOWN: f32 = 2.0;

    /// Starts on the low range constant
    pub fn new(k_low: f32, k_high: f32) -> Self {
        Self {
            k_low,
            k_high,
            k: k_low,
        }
    }

    /// Cell constant the next reading starts from
    pub fn active_k(&self) -> f32 {
        self.k
    }

    fn raw_ec(millivolts: f32) -> f32 {
        1000.0 * millivolts / Self::RES2 / Self::EC_REF
    }
}

impl EcCalibration for KValueCalibration {
    fn read_ec(&mut self, millivolts: f32, temperature_c: f32) -> f32 {
        let raw = Self::raw_ec(millivolts);
        let estimate = raw * self.k;
        if estimate > Self::SWITCH_UP {
            self.k = self.k_high;
        } else if estimate < Self::SWITCH_DOWN {
            self.k = self.k_low;
        }
        raw * self.k / (1.0 + Self::TEMP_COEFFICIENT * (temperature_c - 25.0))
    }
}
