//! Host side of the soil-quality monitor: runs the probe's sampling
//! station on a Linux board (RPI or similar) with a MAX485 transceiver
//! on a serial tty, its DE/RE lines on GPIO character device lines, and
//! the analog probes behind an IIO ADC.

pub mod config;
pub mod hardware;
pub mod report;

use thiserror::Error;

use sqmp_sensor::ModbusError;

pub use hardware::{
    open_station, open_transport, HostStation, IioChannel, SerialPortBus, Transport,
};
pub use report::ReportLine;

#[derive(Error, Debug)]
pub enum StationError {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    #[error("Serial port error")]
    Serial(#[from] serialport::Error),

    #[error("GPIO line error")]
    Gpio(#[from] linux_embedded_hal::gpio_cdev::errors::Error),

    #[error("Modbus error")]
    Modbus(#[from] ModbusError),

    #[error("ADC value {0:?} is not a number")]
    AdcParse(String),

    #[error("Report serialization error")]
    Json(#[from] serde_json::Error),
}

pub type StationResult<T> = Result<T, StationError>;
