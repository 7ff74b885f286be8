//! Periodic sampling cycle for a probe board: pH through the trimmed
//! mean window, EC and soil moisture as plain averages, then the Modbus
//! combo sensor with retries. Every cycle hands back a [`SensorReport`];
//! nothing is kept between cycles except the pH window and the last good
//! combo value.

use embedded_hal::delay::DelayNs;
use serde::Serialize;

use crate::analog::{
    counts_to_millivolts, counts_to_volts, AnalogInput, EcCalibration, PhProbe, SoilCalibration,
};
use crate::modbus::{DeviceAddress, RegisterSource, RetryPolicy};
use crate::{config, ModbusError, SampleRing, PH_WINDOW};

/// Solution temperature assumed for EC compensation when nothing better
/// is known
pub const DEFAULT_TEMPERATURE_C: f32 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSchedule {
    pub ph_readings: u8,
    pub ph_interval_ms: u32,
    pub ec_readings: u8,
    pub ec_interval_ms: u32,
    pub soil_readings: u8,
    pub soil_interval_ms: u32,
    /// Consecutive failed combo reads before discovery is re-run,
    /// 0 disables re-discovery
    pub rediscover_after: u8,
}

impl Default for SampleSchedule {
    fn default() -> Self {
        config::sample_schedule()
    }
}

/// Combo sensor value as of this cycle. `fresh` is false when this
/// cycle's read failed and `value` is the last good one (0.0 if there
/// never was one).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComboReading {
    pub value: f32,
    pub fresh: bool,
    pub address: DeviceAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorReport {
    pub ph: Option<f32>,
    pub ec_ms_cm: Option<f32>,
    pub soil_raw: Option<u16>,
    pub soil_moisture_pct: Option<u8>,
    pub combo: ComboReading,
}

/// The three analog channels of the board
pub struct AnalogProbes<PH, EC, SOIL> {
    pub ph: PH,
    pub ec: EC,
    pub soil: SOIL,
}

pub struct Station<PH, EC, SOIL, CAL, BUS, D> {
    probes: AnalogProbes<PH, EC, SOIL>,
    ec_calibration: CAL,
    bus: BUS,
    delay: D,
    ph_window: SampleRing<PH_WINDOW>,
    ph_probe: PhProbe,
    soil_calibration: SoilCalibration,
    schedule: SampleSchedule,
    retry: RetryPolicy,
    temperature_c: f32,
    last_combo: f32,
    failed_cycles: u8,
}

impl<PH, EC, SOIL, CAL, BUS, D> Station<PH, EC, SOIL, CAL, BUS, D>
where
    PH: AnalogInput,
    EC: AnalogInput,
    SOIL: AnalogInput,
    CAL: EcCalibration,
    BUS: RegisterSource,
    D: DelayNs,
{
    pub fn new(
        probes: AnalogProbes<PH, EC, SOIL>,
        ec_calibration: CAL,
        bus: BUS,
        delay: D,
    ) -> Self {
        Self {
            probes,
            ec_calibration,
            bus,
            delay,
            ph_window: SampleRing::new(),
            ph_probe: PhProbe::default(),
            soil_calibration: SoilCalibration::default(),
            schedule: SampleSchedule::default(),
            retry: RetryPolicy::default(),
            temperature_c: DEFAULT_TEMPERATURE_C,
            last_combo: 0.0,
            failed_cycles: 0,
        }
    }

    pub fn with_schedule(mut self, schedule: SampleSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_ph_probe(mut self, ph_probe: PhProbe) -> Self {
        self.ph_probe = ph_probe;
        self
    }

    pub fn with_soil_calibration(mut self, soil_calibration: SoilCalibration) -> Self {
        self.soil_calibration = soil_calibration;
        self
    }

    pub fn set_temperature(&mut self, temperature_c: f32) {
        self.temperature_c = temperature_c;
    }

    pub fn last_combo_value(&self) -> f32 {
        self.last_combo
    }

    pub fn ph_window(&self) -> &SampleRing<PH_WINDOW> {
        &self.ph_window
    }

    pub fn bus(&self) -> &BUS {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut BUS {
        &mut self.bus
    }

    /// Find the combo sensor's address. A failure is logged and the
    /// current address stays in use.
    pub fn discover(&mut self) -> Result<DeviceAddress, ModbusError> {
        let current = self.bus.address();
        self.bus
            .discover()
            .inspect(|address| log::info!("*** Combo sensor responds to slave ID: {address}"))
            .inspect_err(|e| log::warn!("Discovery failed ({e}), using {current}"))
    }

    pub fn sample_cycle(&mut self) -> SensorReport {
        log::info!("=== Reading all sensors ===");

        let ph = self.sample_ph();
        let ec_ms_cm = self.sample_ec();
        let soil = self.sample_soil();
        let combo = self.read_combo();

        log::info!("=== Sensor reading complete ===");

        SensorReport {
            ph,
            ec_ms_cm,
            soil_raw: soil.map(|(raw, _)| raw),
            soil_moisture_pct: soil.map(|(_, pct)| pct),
            combo,
        }
    }

    /// Push fresh pH samples through the window, converting the window
    /// mean after every push, and average the converted values
    pub fn sample_ph(&mut self) -> Option<f32> {
        let mut sum = 0.0;
        let mut taken = 0u32;

        for i in 0..self.schedule.ph_readings {
            if i > 0 {
                self.delay.delay_ms(self.schedule.ph_interval_ms);
            }
            let raw = match self.probes.ph.read_counts() {
                Ok(raw) => raw,
                Err(e) => {
                    log::warn!("pH channel read failed: {e:?}");
                    continue;
                }
            };
            self.ph_window.push(raw as i32);
            if let Ok(mean) = self.ph_window.average() {
                sum += self.ph_probe.ph(counts_to_volts(mean));
                taken += 1;
            }
        }

        if taken == 0 {
            return None;
        }
        let ph = sum / taken as f32;
        log::info!("Average pH value ({taken} readings): {ph:.2}");
        Some(ph)
    }

    pub fn sample_ec(&mut self) -> Option<f32> {
        let mut sum = 0.0;
        let mut taken = 0u32;

        for i in 0..self.schedule.ec_readings {
            if i > 0 {
                self.delay.delay_ms(self.schedule.ec_interval_ms);
            }
            match self.probes.ec.read_counts() {
                Ok(raw) => {
                    let millivolts = counts_to_millivolts(raw);
                    sum += self.ec_calibration.read_ec(millivolts, self.temperature_c);
                    taken += 1;
                }
                Err(e) => log::warn!("EC channel read failed: {e:?}"),
            }
        }

        if taken == 0 {
            return None;
        }
        let ec = sum / taken as f32;
        log::info!("Average EC value ({taken} readings): {ec:.4} ms/cm");
        Some(ec)
    }

    /// Mean raw soil value (truncated) and its moisture percentage
    pub fn sample_soil(&mut self) -> Option<(u16, u8)> {
        let mut sum = 0.0f32;
        let mut taken = 0u32;

        for i in 0..self.schedule.soil_readings {
            if i > 0 {
                self.delay.delay_ms(self.schedule.soil_interval_ms);
            }
            match self.probes.soil.read_counts() {
                Ok(raw) => {
                    sum += raw as f32;
                    taken += 1;
                }
                Err(e) => log::warn!("Soil channel read failed: {e:?}"),
            }
        }

        if taken == 0 {
            return None;
        }
        let raw = (sum / taken as f32) as u16;
        let pct = self.soil_calibration.percent(raw as i32);
        log::info!("Average soil moisture: {pct}% (raw {raw})");
        Some((raw, pct))
    }

    /// Read the combo sensor. A failed read leaves the last good value in
    /// place and marks the reading stale.
    pub fn read_combo(&mut self) -> ComboReading {
        let address = self.bus.address();
        match self.bus.read_with_retry(&self.retry) {
            Ok(value) => {
                self.last_combo = value;
                self.failed_cycles = 0;
                log::info!("Combo sensor pH: {value:.2}");
                ComboReading {
                    value,
                    fresh: true,
                    address,
                }
            }
            Err(e) => {
                log::warn!(
                    "Combo sensor read failed ({e}), last value {:.2} is stale",
                    self.last_combo
                );
                self.failed_cycles = self.failed_cycles.saturating_add(1);
                if self.schedule.rediscover_after > 0
                    && self.failed_cycles >= self.schedule.rediscover_after
                {
                    log::info!("{} failed cycles, re-running discovery", self.failed_cycles);
                    self.failed_cycles = 0;
                    let _ = self.discover();
                }
                ComboReading {
                    value: self.last_combo,
                    fresh: false,
                    address,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analog::KValueCalibration;
    use core::convert::Infallible;
    use std::collections::VecDeque;

    struct Fixed(u16);

    impl AnalogInput for Fixed {
        type Error = Infallible;

        fn read_counts(&mut self) -> Result<u16, Self::Error> {
            Ok(self.0)
        }
    }

    struct Script(VecDeque<u16>);

    impl AnalogInput for Script {
        type Error = &'static str;

        fn read_counts(&mut self) -> Result<u16, Self::Error> {
            self.0.pop_front().ok_or("empty")
        }
    }

    #[derive(Default)]
    struct Clock {
        elapsed_ns: u64,
    }

    impl DelayNs for Clock {
        fn delay_ns(&mut self, ns: u32) {
            self.elapsed_ns += ns as u64;
        }
    }

    struct FakeBus {
        address: DeviceAddress,
        reads: VecDeque<Result<f32, ModbusError>>,
        discoveries: usize,
    }

    impl FakeBus {
        fn idle() -> Self {
            Self::new(Vec::new())
        }

        fn new(reads: impl IntoIterator<Item = Result<f32, ModbusError>>) -> Self {
            Self {
                address: DeviceAddress::DEFAULT,
                reads: reads.into_iter().collect(),
                discoveries: 0,
            }
        }
    }

    impl RegisterSource for FakeBus {
        fn address(&self) -> DeviceAddress {
            self.address
        }

        fn discover(&mut self) -> Result<DeviceAddress, ModbusError> {
            self.discoveries += 1;
            Err(ModbusError::DiscoveryFailed)
        }

        fn read_with_retry(&mut self, _policy: &RetryPolicy) -> Result<f32, ModbusError> {
            self.reads.pop_front().unwrap_or(Err(ModbusError::Timeout))
        }
    }

    fn station<PH: AnalogInput, EC: AnalogInput, SOIL: AnalogInput>(
        ph: PH,
        ec: EC,
        soil: SOIL,
        bus: FakeBus,
    ) -> Station<PH, EC, SOIL, KValueCalibration, FakeBus, Clock> {
        Station::new(
            AnalogProbes { ph, ec, soil },
            KValueCalibration::default(),
            bus,
            Clock::default(),
        )
    }

    #[test]
    fn ph_window_fills_from_zero() {
        let mut st = station(Fixed(512), Fixed(0), Fixed(0), FakeBus::idle());
        let mut previous = 0.0;
        for _ in 0..4 {
            let ph = st.sample_ph().unwrap();
            assert!(ph > previous);
            assert!(ph < 8.75);
            previous = ph;
        }
        // window holds 40 samples of 512 (2.5 V) from here on
        assert_eq!(st.sample_ph(), Some(8.75));
        assert!(st.ph_window().as_slice().iter().all(|&s| s == 512));
    }

    #[test]
    fn ph_skips_failed_samples() {
        let mut st = station(
            Script(VecDeque::from([512, 512])),
            Fixed(0),
            Fixed(0),
            FakeBus::idle(),
        );
        assert!(st.sample_ph().is_some());
        assert_eq!(st.ph_window().cursor(), 2);

        assert_eq!(st.sample_ph(), None);
        assert_eq!(st.ph_window().cursor(), 2);
    }

    #[test]
    fn soil_average_truncates() {
        let mut st = station(
            Fixed(0),
            Fixed(0),
            Script(VecDeque::from([285, 286, 286, 286, 286])),
            FakeBus::idle(),
        );
        // 1429 / 5 = 285.8
        assert_eq!(st.sample_soil(), Some((285, 50)));
    }

    #[test]
    fn ec_uses_station_temperature() {
        // 336 counts = 1640.625 mV
        let mut st = station(Fixed(0), Fixed(336), Fixed(0), FakeBus::idle());
        let at_25 = st.sample_ec().unwrap();
        assert!((at_25 - 10.0038).abs() < 1e-3);

        st.set_temperature(35.0);
        assert!(st.sample_ec().unwrap() < at_25);
    }

    #[test]
    fn failed_read_keeps_last_value_but_marks_stale() {
        let bus = FakeBus::new([Ok(6.5), Err(ModbusError::Timeout)]);
        let mut st = station(Fixed(0), Fixed(0), Fixed(0), bus);

        let first = st.read_combo();
        assert!(first.fresh);
        assert_eq!(first.value, 6.5);

        let second = st.read_combo();
        assert!(!second.fresh);
        assert_eq!(second.value, 6.5);
        assert_eq!(st.last_combo_value(), 6.5);
    }

    #[test]
    fn mismatch_keeps_last_value() {
        let mismatch = ModbusError::DecodeMismatch {
            expected: DeviceAddress(0x02),
            address: 0x07,
            function: 0x03,
        };
        let bus = FakeBus::new([Ok(7.25), Err(mismatch)]);
        let mut st = station(Fixed(0), Fixed(0), Fixed(0), bus);
        st.read_combo();
        assert_eq!(st.read_combo().value, 7.25);
    }

    #[test]
    fn never_read_reports_zero() {
        let mut st = station(Fixed(0), Fixed(0), Fixed(0), FakeBus::idle());
        let combo = st.read_combo();
        assert!(!combo.fresh);
        assert_eq!(combo.value, 0.0);
        assert_eq!(combo.address, DeviceAddress::DEFAULT);
    }

    #[test]
    fn rediscovers_after_consecutive_failures() {
        let schedule = SampleSchedule {
            rediscover_after: 3,
            ..SampleSchedule::default()
        };
        let bus = FakeBus::new([
            Err(ModbusError::Timeout),
            Err(ModbusError::Timeout),
            Ok(1.0),
            Err(ModbusError::Timeout),
            Err(ModbusError::Timeout),
            Err(ModbusError::Timeout),
        ]);
        let mut st = station(Fixed(0), Fixed(0), Fixed(0), bus).with_schedule(schedule);

        for _ in 0..5 {
            st.read_combo();
        }
        assert_eq!(st.bus().discoveries, 0);
        st.read_combo();
        assert_eq!(st.bus().discoveries, 1);
    }

    #[test]
    fn cycle_report() {
        let bus = FakeBus::new([Ok(6.8)]);
        let mut st = station(Fixed(512), Fixed(336), Fixed(570), bus);
        let report = st.sample_cycle();

        assert!(report.ph.is_some());
        assert!(report.ec_ms_cm.is_some());
        assert_eq!(report.soil_raw, Some(570));
        assert_eq!(report.soil_moisture_pct, Some(0));
        assert_eq!(
            report.combo,
            ComboReading {
                value: 6.8,
                fresh: true,
                address: DeviceAddress::DEFAULT
            }
        );

        // 9 pH gaps of 1 s, 4 + 4 gaps of 500 ms
        assert_eq!(st.delay.elapsed_ns, 13_000_000_000);
    }
}
