//! TensorBoard event file reading.
//!
//! Event files are TFRecord streams of protobuf `Event` messages. This module
//! decodes just enough of the format to recover scalar summaries.

pub mod proto;
pub mod reader;
pub mod record;

pub use reader::extract_scalars;

/// Encoders for building event files in tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::record::masked_crc32c;
    use std::path::{Path, PathBuf};

    fn varint(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                return;
            }
            out.push(byte | 0x80);
        }
    }

    fn key(field: u64, wire_type: u64, out: &mut Vec<u8>) {
        varint((field << 3) | wire_type, out);
    }

    pub fn varint_field(field: u64, v: u64) -> Vec<u8> {
        let mut out = Vec::new();
        key(field, 0, &mut out);
        varint(v, &mut out);
        out
    }

    pub fn len_field(field: u64, bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        key(field, 2, &mut out);
        varint(bytes.len() as u64, &mut out);
        out.extend_from_slice(bytes);
        out
    }

    fn fixed32_field(field: u64, bytes: [u8; 4]) -> Vec<u8> {
        let mut out = Vec::new();
        key(field, 5, &mut out);
        out.extend_from_slice(&bytes);
        out
    }

    fn fixed64_field(field: u64, bytes: [u8; 8]) -> Vec<u8> {
        let mut out = Vec::new();
        key(field, 1, &mut out);
        out.extend_from_slice(&bytes);
        out
    }

    fn event_with_values(wall_time: f64, step: i64, values: Vec<Vec<u8>>) -> Vec<u8> {
        let mut summary = Vec::new();
        for value in values {
            summary.extend(len_field(1, &value));
        }

        let mut event = fixed64_field(1, wall_time.to_le_bytes());
        event.extend(varint_field(2, step as u64));
        event.extend(len_field(5, &summary));
        event
    }

    /// An `Event` with one `simple_value` per `(tag, value)`.
    pub fn encode_event(wall_time: f64, step: i64, scalars: &[(&str, f32)]) -> Vec<u8> {
        let values = scalars
            .iter()
            .map(|(tag, v)| {
                let mut value = len_field(1, tag.as_bytes());
                value.extend(fixed32_field(2, v.to_le_bytes()));
                value
            })
            .collect();
        event_with_values(wall_time, step, values)
    }

    #[derive(Debug, Clone, Copy)]
    pub enum TensorEncoding {
        FloatVal,
        DoubleVal,
        FloatContent,
        DoubleContent,
    }

    /// An `Event` whose scalar is stored as a rank-0 tensor.
    pub fn encode_tensor_event(step: i64, tag: &str, v: f64, encoding: TensorEncoding) -> Vec<u8> {
        let tensor = match encoding {
            TensorEncoding::FloatVal => {
                let mut t = varint_field(1, 1);
                t.extend(len_field(5, &(v as f32).to_le_bytes()));
                t
            }
            TensorEncoding::DoubleVal => {
                let mut t = varint_field(1, 2);
                t.extend(len_field(6, &v.to_le_bytes()));
                t
            }
            TensorEncoding::FloatContent => {
                let mut t = varint_field(1, 1);
                t.extend(len_field(4, &(v as f32).to_le_bytes()));
                t
            }
            TensorEncoding::DoubleContent => {
                let mut t = varint_field(1, 2);
                t.extend(len_field(4, &v.to_le_bytes()));
                t
            }
        };

        let mut value = len_field(1, tag.as_bytes());
        value.extend(len_field(8, &tensor));
        event_with_values(0.0, step, vec![value])
    }

    /// Wrap a payload in a TFRecord frame with valid checksums.
    pub fn frame(payload: &[u8]) -> Vec<u8> {
        let len = (payload.len() as u64).to_le_bytes();
        let mut out = Vec::with_capacity(payload.len() + 16);
        out.extend_from_slice(&len);
        out.extend_from_slice(&masked_crc32c(&len).to_le_bytes());
        out.extend_from_slice(payload);
        out.extend_from_slice(&masked_crc32c(payload).to_le_bytes());
        out
    }

    /// Write an event file with one event per `(step, scalars)` entry.
    pub fn write_event_file(
        dir: &Path,
        name: &str,
        events: &[(i64, Vec<(&str, f32)>)],
    ) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let mut bytes = frame(&len_field(3, b"brain.Event:2"));
        for (step, scalars) in events {
            bytes.extend(frame(&encode_event(1.7e9, *step, scalars)));
        }
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }
}
