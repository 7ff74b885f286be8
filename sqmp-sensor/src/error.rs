use thiserror::Error;

use crate::modbus::DeviceAddress;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModbusError {
    #[error("Timed out waiting for reply")]
    Timeout,
    #[error(
        "Reply mismatch: expected {expected} got address {address:#04x} function {function:#04x}"
    )]
    DecodeMismatch {
        expected: DeviceAddress,
        address: u8,
        function: u8,
    },
    #[error("Reply CRC mismatch")]
    CrcMismatch,
    #[error("No candidate address responded")]
    DiscoveryFailed,
    #[error("Direction pin error")]
    Pin,
    #[error("Serial error {0:?}")]
    Serial(embedded_io::ErrorKind),
}

impl ModbusError {
    pub(crate) fn serial<E: embedded_io::Error>(e: E) -> Self {
        ModbusError::Serial(e.kind())
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterError {
    #[error("Invalid sample count for averaging")]
    InvalidInput,
}
