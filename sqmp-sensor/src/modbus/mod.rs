//! Modbus RTU master for a single slave on a half-duplex RS485 segment.
//! Only "read holding registers" (0x03) of one register at 0x0000 is
//! ever issued; that is all the combo sensor needs.

mod crc;
mod frame;
mod rs485;
mod transport;

pub use crc::{append_crc, check_crc, crc16};
pub use frame::{
    DeviceAddress, HexBytes, ModbusFrame, RegisterReply, FUNCTION_READ_HOLDING, REPLY_LEN,
    REQUEST_LEN,
};
pub use rs485::Rs485Direction;
pub use transport::{positive, ModbusTransport, RegisterSource, RetryPolicy, RxBuffer, Timing};
