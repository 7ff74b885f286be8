//! Sensor lib for the soil-quality monitor probe. Defines the base
//! read operations for the sensors wired to a probe board:
//!
//! 1. Analog sensors (pH, conductivity, soil moisture) sampled by
//!    the board ADC. Raw counts go through [`filter::SampleRing`] and
//!    the outlier-trimmed mean in [`filter::trimmed_mean`], and are
//!    converted to physical units by the helpers in [`analog`].
//!
//! 2. A Modbus RTU combo sensor on a single RS485 segment, driven by
//!    [`modbus::ModbusTransport`] over any `embedded-io` serial port and
//!    two `embedded-hal` output pins for the MAX485 direction lines.
//!    The transport handles device discovery, request framing, CRC16 and
//!    reply parsing with timeouts.
//!
//! [`station::Station`] ties both together into the periodic sampling
//! cycle and hands back a [`station::SensorReport`] per cycle. Host
//! builds (the `sqmd` crate) enable the `std` feature; firmware builds
//! use the crate as `no_std`.
#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod analog;
pub mod config;
mod error;
pub mod filter;
pub mod modbus;
pub mod station;

pub use error::{FilterError, ModbusError};
pub use filter::{trimmed_mean, SampleRing};
pub use modbus::{DeviceAddress, ModbusFrame, ModbusTransport, RegisterReply, RetryPolicy};
pub use station::{ComboReading, SensorReport, Station};

/// Capacity of the pH sample window
pub const PH_WINDOW: usize = 40;
