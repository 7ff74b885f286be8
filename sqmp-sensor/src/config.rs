//! Compile time configuration. Values can be overridden from the
//! `[sqmp-sensor]` table of a `cfg.toml` at build time; anything not
//! set there falls back to the defaults below.

use crate::modbus::{RetryPolicy, Timing};
use crate::station::SampleSchedule;

#[toml_cfg::toml_config]
pub struct Config {
    #[default(9600)]
    baud_rate: u32,
    #[default(10)]
    settle_ms: u32,
    #[default(100)]
    inter_byte_gap_us: u32,
    #[default(10)]
    poll_interval_ms: u32,
    #[default(500)]
    probe_timeout_ms: u32,
    #[default(1000)]
    read_timeout_ms: u32,
    #[default(500)]
    discovery_backoff_ms: u32,
    #[default(false)]
    verify_reply_crc: bool,
    #[default(3)]
    read_attempts: u8,
    #[default(1000)]
    retry_backoff_ms: u32,
    #[default(3)]
    rediscover_after: u8,
    #[default(10)]
    ph_readings: u8,
    #[default(1000)]
    ph_interval_ms: u32,
    #[default(5)]
    ec_readings: u8,
    #[default(500)]
    ec_interval_ms: u32,
    #[default(5)]
    soil_readings: u8,
    #[default(500)]
    soil_interval_ms: u32,
}

/// Serial line rate of the RS485 segment
pub fn baud_rate() -> u32 {
    CONFIG.baud_rate
}

pub fn verify_reply_crc() -> bool {
    CONFIG.verify_reply_crc
}

pub fn modbus_timing() -> Timing {
    Timing {
        settle_ms: CONFIG.settle_ms,
        inter_byte_gap_us: CONFIG.inter_byte_gap_us,
        poll_interval_ms: CONFIG.poll_interval_ms,
        probe_timeout_ms: CONFIG.probe_timeout_ms,
        read_timeout_ms: CONFIG.read_timeout_ms,
        discovery_backoff_ms: CONFIG.discovery_backoff_ms,
    }
}

pub fn retry_policy() -> RetryPolicy {
    RetryPolicy {
        attempts: CONFIG.read_attempts,
        backoff_ms: CONFIG.retry_backoff_ms,
        accept: crate::modbus::positive,
    }
}

pub fn sample_schedule() -> SampleSchedule {
    SampleSchedule {
        ph_readings: CONFIG.ph_readings,
        ph_interval_ms: CONFIG.ph_interval_ms,
        ec_readings: CONFIG.ec_readings,
        ec_interval_ms: CONFIG.ec_interval_ms,
        soil_readings: CONFIG.soil_readings,
        soil_interval_ms: CONFIG.soil_interval_ms,
        rediscover_after: CONFIG.rediscover_after,
    }
}
