use crc16::{State, ARC};

use super::{framer::{CHECKSUM_LEN, END_MARKER}, P1Error};

/// CRC16 as transmitted by DSMR meters: x^16 + x^15 + x^2 + 1, init 0, no xorout, LSB first.
pub fn crc16_arc(data: &[u8]) -> u16 {
    State::<ARC>::calculate(data)
}

/// Check the trailing checksum of a telegram, the computed CRC covers
/// everything up to and including the `!`.
pub fn verify(frame: &[u8]) -> Result<(), P1Error> {
    let mut markers = frame.iter().enumerate().filter(|(_, b)| **b == END_MARKER);

    let end = match markers.next() {
        Some((pos, _)) => pos,
        None => return Err(P1Error::MissingEndMarker),
    };

    if markers.next().is_some() {
        return Err(P1Error::MultipleEndMarkers);
    }

    let trailer = &frame[end + 1..];
    if trailer.len() < CHECKSUM_LEN {
        return Err(P1Error::ChecksumTooShort);
    }

    let transmitted = &trailer[..CHECKSUM_LEN];
    let computed = format!("{:04X}", crc16_arc(&frame[..=end]));

    if !computed.as_bytes().eq_ignore_ascii_case(transmitted) {
        return Err(P1Error::ChecksumMismatch {
            transmitted: String::from_utf8_lossy(transmitted).to_string(),
            computed,
        });
    }

    Ok(())
}

pub fn validate(frame: &[u8]) -> bool {
    verify(frame).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TELEGRAM: &[u8] = b"/ABC\r\n0-0:96.14.0(0002)\r\n1-0:1.7.0(01.234*kW)\r\n!46E7";

    #[test]
    fn test_known_answer() {
        assert_eq!(crc16_arc(b"123456789"), 0xBB3D);
        assert_eq!(crc16_arc(b""), 0x0000);
    }

    #[test]
    fn test_valid_telegram() {
        assert!(validate(TELEGRAM));
        assert!(verify(TELEGRAM).is_ok());
    }

    #[test]
    fn test_lowercase_checksum_accepted() {
        let telegram = b"/ABC\r\n0-0:96.14.0(0002)\r\n1-0:1.7.0(01.234*kW)\r\n!46e7";
        assert!(validate(telegram));
    }

    #[test]
    fn test_trailing_line_end_ignored() {
        let mut telegram = TELEGRAM.to_vec();
        telegram.extend_from_slice(b"\r\n");
        assert!(validate(&telegram));
    }

    #[test]
    fn test_wrong_checksum() {
        let telegram = b"/ABC\r\n0-0:96.14.0(0002)\r\n1-0:1.7.0(01.234*kW)\r\n!FFFF";
        match verify(telegram) {
            Err(P1Error::ChecksumMismatch { transmitted, computed }) => {
                assert_eq!(transmitted, "FFFF");
                assert_eq!(computed, "46E7");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(verify(b"/ABC\r\n"), Err(P1Error::MissingEndMarker)));
        assert!(matches!(verify(b"/ABC\r\n!46E"), Err(P1Error::ChecksumTooShort)));
        assert!(matches!(verify(b"/AB!C\r\n!46E7"), Err(P1Error::MultipleEndMarkers)));
    }

    #[test]
    fn test_single_bit_flips_rejected() {
        let end = TELEGRAM.iter().position(|b| *b == b'!').unwrap();
        for pos in 0..end {
            for bit in 0..8 {
                let mut telegram = TELEGRAM.to_vec();
                telegram[pos] ^= 1 << bit;
                if telegram[pos] == b'!' {
                    continue;
                }
                assert!(!validate(&telegram), "flip of bit {bit} at {pos} not detected");
            }
        }
    }
}
