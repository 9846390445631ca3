//! Minimal protobuf wire decoding for TensorBoard `Event` records.
//!
//! Only the fields needed to recover scalar summaries are interpreted;
//! everything else is skipped by wire type.

/// Decoding failure inside one record payload.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{reason} (payload byte {position})")]
pub struct WireError {
    pub position: usize,
    pub reason: String,
}

type WireResult<T> = Result<T, WireError>;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

// TensorFlow DataType enum values.
const DT_FLOAT: u64 = 1;
const DT_DOUBLE: u64 = 2;

/// A scalar carried by a summary value.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedScalar {
    pub tag: String,
    pub value: f64,
}

/// The parts of an `Event` relevant to scalar extraction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Event {
    pub wall_time: f64,
    pub step: i64,
    pub scalars: Vec<TaggedScalar>,
}

struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_done(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn error(&self, reason: impl Into<String>) -> WireError {
        WireError {
            position: self.pos,
            reason: reason.into(),
        }
    }

    fn varint(&mut self) -> WireResult<u64> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| self.error("truncated varint"))?;
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(self.error("varint longer than 10 bytes"))
    }

    fn take(&mut self, n: usize) -> WireResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| self.error(format!("field of {} bytes runs past end", n)))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn fixed32(&mut self) -> WireResult<[u8; 4]> {
        let bytes = self.take(4)?;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn fixed64(&mut self) -> WireResult<[u8; 8]> {
        let bytes = self.take(8)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn length_delimited(&mut self) -> WireResult<&'a [u8]> {
        let len = self.varint()?;
        let len = usize::try_from(len).map_err(|_| self.error("length overflows usize"))?;
        self.take(len)
    }

    /// Returns `(field_number, wire_type)`.
    fn key(&mut self) -> WireResult<(u64, u8)> {
        let key = self.varint()?;
        Ok((key >> 3, (key & 0x7) as u8))
    }

    fn skip(&mut self, wire_type: u8) -> WireResult<()> {
        match wire_type {
            WIRE_VARINT => self.varint().map(|_| ()),
            WIRE_FIXED64 => self.take(8).map(|_| ()),
            WIRE_LEN => self.length_delimited().map(|_| ()),
            WIRE_FIXED32 => self.take(4).map(|_| ()),
            other => Err(self.error(format!("unsupported wire type {}", other))),
        }
    }

    fn expect(&self, wire_type: u8, expected: u8, field: &str) -> WireResult<()> {
        if wire_type == expected {
            Ok(())
        } else {
            Err(self.error(format!(
                "field '{}' has wire type {}, expected {}",
                field, wire_type, expected
            )))
        }
    }
}

/// Decode an `Event` message.
pub fn decode_event(buf: &[u8]) -> WireResult<Event> {
    let mut reader = WireReader::new(buf);
    let mut event = Event::default();

    while !reader.is_done() {
        let (field, wire_type) = reader.key()?;
        match field {
            1 => {
                reader.expect(wire_type, WIRE_FIXED64, "wall_time")?;
                event.wall_time = f64::from_le_bytes(reader.fixed64()?);
            }
            2 => {
                reader.expect(wire_type, WIRE_VARINT, "step")?;
                event.step = reader.varint()? as i64;
            }
            5 => {
                reader.expect(wire_type, WIRE_LEN, "summary")?;
                let summary = reader.length_delimited()?;
                decode_summary(summary, &mut event.scalars)?;
            }
            _ => reader.skip(wire_type)?,
        }
    }

    Ok(event)
}

fn decode_summary(buf: &[u8], out: &mut Vec<TaggedScalar>) -> WireResult<()> {
    let mut reader = WireReader::new(buf);
    while !reader.is_done() {
        let (field, wire_type) = reader.key()?;
        if field == 1 && wire_type == WIRE_LEN {
            let value = reader.length_delimited()?;
            if let Some(scalar) = decode_value(value)? {
                out.push(scalar);
            }
        } else {
            reader.skip(wire_type)?;
        }
    }
    Ok(())
}

/// `Summary.Value`: tag = 1, simple_value = 2, tensor = 8.
fn decode_value(buf: &[u8]) -> WireResult<Option<TaggedScalar>> {
    let mut reader = WireReader::new(buf);
    let mut tag = None;
    let mut value = None;

    while !reader.is_done() {
        let (field, wire_type) = reader.key()?;
        match (field, wire_type) {
            (1, WIRE_LEN) => {
                let raw = reader.length_delimited()?;
                tag = Some(String::from_utf8_lossy(raw).into_owned());
            }
            (2, WIRE_FIXED32) => {
                value = Some(f64::from(f32::from_le_bytes(reader.fixed32()?)));
            }
            (8, WIRE_LEN) => {
                let tensor = reader.length_delimited()?;
                if value.is_none() {
                    value = decode_scalar_tensor(tensor)?;
                }
            }
            _ => reader.skip(wire_type)?,
        }
    }

    Ok(match (tag, value) {
        (Some(tag), Some(value)) => Some(TaggedScalar { tag, value }),
        _ => None,
    })
}

/// First element of a float or double `TensorProto`, if any.
fn decode_scalar_tensor(buf: &[u8]) -> WireResult<Option<f64>> {
    let mut reader = WireReader::new(buf);
    let mut dtype = 0u64;
    let mut content: &[u8] = &[];
    let mut first: Option<f64> = None;

    while !reader.is_done() {
        let (field, wire_type) = reader.key()?;
        match (field, wire_type) {
            (1, WIRE_VARINT) => dtype = reader.varint()?,
            (4, WIRE_LEN) => content = reader.length_delimited()?,
            // float_val, packed or not
            (5, WIRE_LEN) => {
                let packed = reader.length_delimited()?;
                if first.is_none() && packed.len() >= 4 {
                    let bytes = [packed[0], packed[1], packed[2], packed[3]];
                    first = Some(f64::from(f32::from_le_bytes(bytes)));
                }
            }
            (5, WIRE_FIXED32) => {
                let v = f64::from(f32::from_le_bytes(reader.fixed32()?));
                first.get_or_insert(v);
            }
            // double_val, packed or not
            (6, WIRE_LEN) => {
                let packed = reader.length_delimited()?;
                if first.is_none() && packed.len() >= 8 {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(&packed[..8]);
                    first = Some(f64::from_le_bytes(bytes));
                }
            }
            (6, WIRE_FIXED64) => {
                let v = f64::from_le_bytes(reader.fixed64()?);
                first.get_or_insert(v);
            }
            _ => reader.skip(wire_type)?,
        }
    }

    if first.is_some() {
        return Ok(first);
    }

    Ok(match (dtype, content.len()) {
        (DT_FLOAT, n) if n >= 4 => {
            let bytes = [content[0], content[1], content[2], content[3]];
            Some(f64::from(f32::from_le_bytes(bytes)))
        }
        (DT_DOUBLE, n) if n >= 8 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&content[..8]);
            Some(f64::from_le_bytes(bytes))
        }
        _ => None,
    })
}
