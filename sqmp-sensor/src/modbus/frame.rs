use core::fmt;

use serde::Serialize;

use super::crc::{append_crc, check_crc};
use crate::ModbusError;

pub const FUNCTION_READ_HOLDING: u8 = 0x03;
pub const REQUEST_LEN: usize = 8;
/// addr + function + byte count + 2 data + 2 crc
pub const REPLY_LEN: usize = 7;

const START_REGISTER: u16 = 0x0000;
const REGISTER_COUNT: u16 = 0x0001;

/// Single byte slave address on the RS485 segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceAddress(pub u8);

impl DeviceAddress {
    /// Address assumed until discovery confirms one
    pub const DEFAULT: DeviceAddress = DeviceAddress(0x02);

    /// Common factory slave ids, probed in this order
    pub const CANDIDATES: [DeviceAddress; 8] = [
        DeviceAddress(0x01),
        DeviceAddress(0x02),
        DeviceAddress(0x03),
        DeviceAddress(0x10),
        DeviceAddress(0x20),
        DeviceAddress(0x30),
        DeviceAddress(0x40),
        DeviceAddress(0x50),
    ];

    pub const fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Renders bytes as `0x02 0x03 ...` for the diagnostic log
pub struct HexBytes<'a>(pub &'a [u8]);

impl fmt::Display for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "0x{:02X}", b)?;
        }
        Ok(())
    }
}

/// Read-holding-register request, CRC already appended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModbusFrame([u8; REQUEST_LEN]);

impl ModbusFrame {
    pub fn read_holding(address: DeviceAddress) -> Self {
        let [reg_hi, reg_lo] = START_REGISTER.to_be_bytes();
        let [cnt_hi, cnt_lo] = REGISTER_COUNT.to_be_bytes();
        let mut bytes = [
            address.0,
            FUNCTION_READ_HOLDING,
            reg_hi,
            reg_lo,
            cnt_hi,
            cnt_lo,
            0x00,
            0x00,
        ];
        append_crc(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn address(&self) -> DeviceAddress {
        DeviceAddress(self.0[0])
    }

    pub fn crc(&self) -> u16 {
        u16::from_le_bytes([self.0[6], self.0[7]])
    }
}

/// Decoded single register reply
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegisterReply {
    pub address: DeviceAddress,
    pub function: u8,
    pub byte_count: u8,
    /// Register contents, two's complement like the sensor's 16-bit int
    pub raw: i16,
    pub crc_ok: bool,
}

impl RegisterReply {
    /// Register values are hundredths of a unit
    pub const SCALE: f32 = 100.0;

    pub fn parse(
        bytes: &[u8],
        expected: DeviceAddress,
        verify_crc: bool,
    ) -> Result<Self, ModbusError> {
        if bytes.len() < REPLY_LEN {
            return Err(ModbusError::Timeout);
        }
        let bytes = &bytes[..REPLY_LEN];

        if bytes[0] != expected.0 || bytes[1] != FUNCTION_READ_HOLDING {
            return Err(ModbusError::DecodeMismatch {
                expected,
                address: bytes[0],
                function: bytes[1],
            });
        }

        let crc_ok = check_crc(bytes);
        if verify_crc && !crc_ok {
            return Err(ModbusError::CrcMismatch);
        }

        Ok(Self {
            address: expected,
            function: bytes[1],
            byte_count: bytes[2],
            raw: i16::from_be_bytes([bytes[3], bytes[4]]),
            crc_ok,
        })
    }

    pub fn value(&self) -> f32 {
        self.raw as f32 / Self::SCALE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_layout() {
        let frame = ModbusFrame::read_holding(DeviceAddress(0x02));
        assert_eq!(
            frame.as_bytes(),
            &[0x02, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x39]
        );
        assert_eq!(frame.crc(), 0x3984);
        assert_eq!(frame.address(), DeviceAddress(0x02));
    }

    #[test]
    fn parse_scales_value() {
        let reply = RegisterReply::parse(
            &[0x10, 0x03, 0x02, 0x02, 0xBC, 0x44, 0x96],
            DeviceAddress(0x10),
            true,
        )
        .unwrap();
        assert_eq!(reply.raw, 700);
        assert!(reply.crc_ok);
        assert!((reply.value() - 7.0).abs() < f32::EPSILON);
    }

    #[test]
    fn parse_decodes_negative_registers() {
        let reply = RegisterReply::parse(
            &[0x10, 0x03, 0x02, 0xFF, 0xFF, 0x45, 0xF7],
            DeviceAddress(0x10),
            true,
        )
        .unwrap();
        assert_eq!(reply.raw, -1);
        assert!((reply.value() + 0.01).abs() < 1e-6);
    }

    #[test]
    fn parse_rejects_wrong_address() {
        let err = RegisterReply::parse(
            &[0x11, 0x03, 0x02, 0x02, 0xBC, 0x00, 0x00],
            DeviceAddress(0x10),
            false,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ModbusError::DecodeMismatch {
                expected: DeviceAddress(0x10),
                address: 0x11,
                function: 0x03
            }
        );
    }

    #[test]
    fn parse_rejects_exception_function() {
        let err = RegisterReply::parse(
            &[0x10, 0x83, 0x02, 0x00, 0x00, 0x00, 0x00],
            DeviceAddress(0x10),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, ModbusError::DecodeMismatch { .. }));
    }

    #[test]
    fn bad_crc_only_fails_when_verifying() {
        let bytes = [0x10, 0x03, 0x02, 0x02, 0xBC, 0x00, 0x00];
        let reply = RegisterReply::parse(&bytes, DeviceAddress(0x10), false).unwrap();
        assert!(!reply.crc_ok);
        assert_eq!(reply.raw, 700);
        assert_eq!(
            RegisterReply::parse(&bytes, DeviceAddress(0x10), true),
            Err(ModbusError::CrcMismatch)
        );
    }

    #[test]
    fn short_reply_is_timeout() {
        assert_eq!(
            RegisterReply::parse(&[0x10, 0x03, 0x02], DeviceAddress(0x10), false),
            Err(ModbusError::Timeout)
        );
    }

    #[test]
    fn hex_rendering() {
        assert_eq!(
            format!("{}", HexBytes(&[0x02, 0x3a, 0xff])),
            "0x02 0x3A 0xFF"
        );
        assert_eq!(DeviceAddress(0x10).to_string(), "0x10");
    }
}
