//! APDU payload codecs
//!
//! Decoding and encoding of KNX telegram payloads for each object kind.
//! A payload buffer starts with the two TPCI/APCI bytes; short-form
//! payloads embed their data in the low six bits of the command byte,
//! long-form payloads carry explicit data bytes from offset 2 on.
//!
//! ```text
//! switching   [tpci, apci|v]               or [tpci, apci, v]
//! dimming     [tpci, apci|ctrl]            or [tpci, apci, ctrl]
//! time        [tpci, apci, (wday<<5)|hour, min, sec]
//! date        [tpci, apci, day, month, year%100]
//! float       [tpci, apci, S EEEE MMM, MMMMMMMM]   (11-bit two's-complement
//!                                                   mantissa, value = m*0.01*2^E)
//! scaling     [tpci, apci, v]
//! heat-mode   [tpci, apci, mode]
//! string      [tpci, apci, c0 .. c13]      (NUL padded)
//! ```

use crate::error::{CoreError, CoreResult};
use crate::value::{BusDate, DimCommand, HeatingMode, ObjectKind, String14, TimeOfDay, TypedValue};

/// Decodes a telegram payload into a typed value.
///
/// Truncated payloads, impossible dates and unknown heating-mode bytes
/// fail with [`CoreError::Parse`]; the object layer logs and drops such
/// frames.
pub fn decode(kind: ObjectKind, buf: &[u8]) -> CoreResult<TypedValue> {
    let truncated = || CoreError::parse("payload", format!("{} bytes", buf.len()));
    match kind {
        ObjectKind::Switching => {
            let raw = match buf.len() {
                0 | 1 => return Err(truncated()),
                2 => buf[1] & 0x3F,
                _ => buf[2] & 0x01,
            };
            Ok(TypedValue::Switch(raw != 0))
        }
        ObjectKind::Dimming => {
            let control = match buf.len() {
                0 | 1 => return Err(truncated()),
                2 => buf[1] & 0x0F,
                _ => buf[2] & 0x0F,
            };
            let step = control & 0x07;
            let cmd = if step == 0 {
                DimCommand::Stop
            } else if control & 0x08 != 0 {
                DimCommand::Up(step)
            } else {
                DimCommand::Down(step)
            };
            Ok(TypedValue::Dimming(cmd))
        }
        ObjectKind::Time => {
            if buf.len() < 5 {
                return Err(truncated());
            }
            let wday = buf[2] >> 5;
            let hour = buf[2] & 0x1F;
            TimeOfDay::new(wday, hour, buf[3], buf[4]).map(TypedValue::Time)
        }
        ObjectKind::Date => {
            if buf.len() < 5 {
                return Err(truncated());
            }
            let year = if buf[4] >= 90 {
                1900 + buf[4] as u16
            } else {
                2000 + buf[4] as u16
            };
            BusDate::new(buf[2], buf[3], year).map(TypedValue::Date)
        }
        ObjectKind::Float => {
            if buf.len() < 4 {
                return Err(truncated());
            }
            let exponent = (buf[2] >> 3) & 0x0F;
            let mut mantissa = (((buf[2] & 0x07) as i32) << 8) | buf[3] as i32;
            if buf[2] & 0x80 != 0 {
                mantissa -= 2048;
            }
            // Division keeps the result bit-identical to parsing the
            // canonical two-decimal text.
            let value = ((mantissa as i64) << exponent) as f64 / 100.0;
            Ok(TypedValue::Float(value))
        }
        ObjectKind::Scaling => {
            if buf.len() < 3 {
                return Err(truncated());
            }
            Ok(TypedValue::Scaling(buf[2]))
        }
        ObjectKind::HeatingMode => {
            if buf.len() < 3 {
                return Err(truncated());
            }
            HeatingMode::from_byte(buf[2])
                .map(TypedValue::HeatingMode)
                .ok_or_else(|| CoreError::parse("heating mode", buf[2].to_string()))
        }
        ObjectKind::Text => {
            if buf.len() < 3 {
                return Err(truncated());
            }
            let window = &buf[2..buf.len().min(16)];
            let end = window.iter().position(|&b| b == 0).unwrap_or(window.len());
            let text = std::str::from_utf8(&window[..end])
                .map_err(|_| CoreError::parse("string", format!("{window:?}")))?;
            String14::new(text).map(TypedValue::Text)
        }
    }
}

/// Encodes a typed value as a group-write payload.
pub fn encode(value: &TypedValue) -> Vec<u8> {
    match value {
        TypedValue::Switch(on) => vec![0x00, 0x80 | *on as u8],
        TypedValue::Dimming(cmd) => {
            let control = match cmd {
                DimCommand::Stop => 0x00,
                DimCommand::Up(step) => 0x08 | step,
                DimCommand::Down(step) => *step,
            };
            vec![0x00, 0x80 | control]
        }
        TypedValue::Time(t) => vec![0x00, 0x80, (t.wday << 5) | t.hour, t.min, t.sec],
        TypedValue::Date(d) => vec![0x00, 0x80, d.day, d.month, (d.year % 100) as u8],
        TypedValue::Float(v) => {
            let (high, low) = encode_float(*v);
            vec![0x00, 0x80, high, low]
        }
        TypedValue::Scaling(v) => vec![0x00, 0x80, *v],
        TypedValue::HeatingMode(m) => vec![0x00, 0x80, m.as_byte()],
        TypedValue::Text(s) => {
            let mut payload = vec![0x00, 0x80];
            let bytes = s.as_str().as_bytes();
            payload.extend_from_slice(bytes);
            payload.resize(2 + 14, 0x00);
            payload
        }
    }
}

/// Packs a float into the 2-byte sign/exponent/mantissa form, halving the
/// scaled mantissa until it fits 11-bit two's complement.
fn encode_float(value: f64) -> (u8, u8) {
    let mut mantissa = (value * 100.0).round() as i32;
    let mut exponent = 0u8;
    while !(-2048..=2047).contains(&mantissa) {
        mantissa /= 2;
        exponent += 1;
    }
    let mut high = (exponent << 3) | (((mantissa & 0x700) >> 8) as u8);
    if mantissa < 0 {
        high |= 0x80;
    }
    (high, (mantissa & 0xFF) as u8)
}
