//! TFRecord framing.
//!
//! Each record is `u64 length | u32 crc(length) | payload | u32 crc(payload)`,
//! all little-endian. Both checksums are masked CRC-32C values; a mismatch is
//! reported on the frame rather than treated as fatal.

const HEADER_LEN: usize = 12;
const FOOTER_LEN: usize = 4;
const CASTAGNOLI: u32 = 0x82f6_3b78;
const MASK_DELTA: u32 = 0xa282_ead8;

/// CRC-32C (Castagnoli), bitwise.
pub fn crc32c(data: &[u8]) -> u32 {
    let mut crc = !0u32;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 == 1 {
                (crc >> 1) ^ CASTAGNOLI
            } else {
                crc >> 1
            };
        }
    }
    !crc
}

/// Checksum as stored in TFRecord files.
pub fn masked_crc32c(data: &[u8]) -> u32 {
    crc32c(data).rotate_right(15).wrapping_add(MASK_DELTA)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

/// One frame read from an event file.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame<'a> {
    Record {
        offset: u64,
        payload: &'a [u8],
        /// Both stored checksums match the bytes read.
        checksum_ok: bool,
    },
    /// The file ends in the middle of a record (writer killed mid-flush).
    Truncated { offset: u64 },
}

/// Iterator over the frames of an in-memory event file.
pub struct Records<'a> {
    data: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> Records<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            done: false,
        }
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Frame<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.data.len() {
            return None;
        }

        let offset = self.pos as u64;
        let remaining = &self.data[self.pos..];

        let payload = (remaining.len() >= HEADER_LEN)
            .then(|| {
                let mut len_bytes = [0u8; 8];
                len_bytes.copy_from_slice(&remaining[..8]);
                u64::from_le_bytes(len_bytes)
            })
            .and_then(|len| usize::try_from(len).ok())
            .and_then(|len| {
                let end = HEADER_LEN.checked_add(len)?.checked_add(FOOTER_LEN)?;
                (end <= remaining.len()).then(|| (&remaining[HEADER_LEN..HEADER_LEN + len], end))
            });

        match payload {
            Some((payload, consumed)) => {
                let header_ok = read_u32(&remaining[8..HEADER_LEN]) == masked_crc32c(&remaining[..8]);
                let footer_ok =
                    read_u32(&remaining[consumed - FOOTER_LEN..consumed]) == masked_crc32c(payload);
                self.pos += consumed;
                Some(Frame::Record {
                    offset,
                    payload,
                    checksum_ok: header_ok && footer_ok,
                })
            }
            None => {
                self.done = true;
                Some(Frame::Truncated { offset })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::frame;

    #[test]
    fn test_iterates_records_in_order() {
        let mut data = frame(b"first");
        data.extend(frame(b""));
        data.extend(frame(b"third"));

        let frames: Vec<_> = Records::new(&data).collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(
            frames[0],
            Frame::Record {
                offset: 0,
                payload: b"first",
                checksum_ok: true,
            }
        );
        assert_eq!(
            frames[1],
            Frame::Record {
                offset: 21,
                payload: b"",
                checksum_ok: true,
            }
        );
        assert!(matches!(frames[2], Frame::Record { payload, .. } if payload == b"third"));
    }

    #[test]
    fn test_truncated_tail_stops_iteration() {
        let mut data = frame(b"complete");
        let second = frame(b"partial record");
        data.extend(&second[..second.len() - 3]);

        let frames: Vec<_> = Records::new(&data).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], Frame::Truncated { offset: 24 });
    }

    #[test]
    fn test_crc32c_known_value() {
        assert_eq!(crc32c(b"123456789"), 0xe306_9283);
        assert_eq!(crc32c(b""), 0);
    }

    #[test]
    fn test_flipped_payload_bit_fails_checksum() {
        let mut data = frame(b"payload");
        data[HEADER_LEN + 2] ^= 0x01;

        let frames: Vec<_> = Records::new(&data).collect();
        assert!(matches!(
            frames[0],
            Frame::Record {
                checksum_ok: false,
                ..
            }
        ));
    }

    #[test]
    fn test_corrupt_length_checksum_is_reported() {
        let mut data = frame(b"abc");
        data[8] ^= 0xff;

        let frames: Vec<_> = Records::new(&data).collect();
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            frames[0],
            Frame::Record {
                payload: b"abc",
                checksum_ok: false,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(Records::new(&[]).count(), 0);
    }
}
