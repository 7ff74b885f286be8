use crc::{Crc, CRC_16_MODBUS};

/// CRC-16/MODBUS: reflected poly 0xA001 (0x8005), init 0xFFFF
const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

pub fn crc16(data: &[u8]) -> u16 {
    MODBUS_CRC.checksum(data)
}

/// Fill the trailing two bytes of `frame` with the CRC of everything
/// before them, low byte first. Frames shorter than 2 bytes are left as is.
pub fn append_crc(frame: &mut [u8]) {
    if frame.len() < 2 {
        return;
    }
    let body = frame.len() - 2;
    let crc = crc16(&frame[..body]);
    frame[body..].copy_from_slice(&crc.to_le_bytes());
}

/// Validate a complete frame whose last two bytes are the CRC (low first)
pub fn check_crc(frame: &[u8]) -> bool {
    if frame.len() < 3 {
        return false;
    }
    let body = frame.len() - 2;
    let received = u16::from_le_bytes([frame[body], frame[body + 1]]);
    crc16(&frame[..body]) == received
}

#[cfg(test)]
mod tests {
    use super::*;

    // Bitwise form of the same algorithm
    fn reference(data: &[u8]) -> u16 {
        let mut crc: u16 = 0xFFFF;
        for &byte in data {
            crc ^= byte as u16;
            for _ in 0..8 {
                if (crc & 0x0001) != 0 {
                    crc = (crc >> 1) ^ 0xA001;
                } else {
                    crc >>= 1;
                }
            }
        }
        crc
    }

    #[test]
    fn known_vectors() {
        let vectors: [(&[u8], u16); 4] = [
            (&[0x02, 0x03, 0x00, 0x00, 0x00, 0x01], 0x3984),
            (&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01], 0x0A84),
            (&[0x10, 0x03, 0x00, 0x00, 0x00, 0x01], 0x4B87),
            (b"123456789", 0x4B37),
        ];
        for (data, expected) in vectors {
            assert_eq!(crc16(data), expected);
            assert_eq!(reference(data), expected);
        }
    }

    #[test]
    fn append_writes_low_byte_first() {
        let mut frame = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00];
        append_crc(&mut frame);
        assert_eq!(&frame[6..], &[0x84, 0x0A]);
        assert!(check_crc(&frame));
    }

    #[test]
    fn check_rejects_corruption() {
        let mut frame = [0x02, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x39];
        assert!(check_crc(&frame));
        frame[5] = 0x02;
        assert!(!check_crc(&frame));
        assert!(!check_crc(&[0x84]));
    }

    #[test]
    fn reply_vector() {
        // 0x10 answering with 0x02BC (7.00)
        let reply = [0x10, 0x03, 0x02, 0x02, 0xBC, 0x44, 0x96];
        assert!(check_crc(&reply));
    }
}
