use anyhow::anyhow;
use clap::ValueEnum;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Register interpretation selected by the user for reads, writes and the
/// slave table. Multi-word types occupy consecutive registers.
#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    Int16,
    #[default]
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
}

impl DataType {
    pub fn registers_needed(&self) -> usize {
        match self {
            DataType::Bool | DataType::Int16 | DataType::UInt16 => 1,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 2,
            DataType::Float64 => 4,
        }
    }

    /// A slot at `offset` within a block holds the first word of a value iff
    /// the offset is a multiple of the value width. Secondary slots are
    /// rendered as placeholders.
    pub fn is_primary(&self, offset: usize) -> bool {
        offset % self.registers_needed() == 0
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DataType::Bool => "Bool",
            DataType::Int16 => "Int16",
            DataType::UInt16 => "UInt16",
            DataType::Int32 => "Int32",
            DataType::UInt32 => "UInt32",
            DataType::Float32 => "Float32",
            DataType::Float64 => "Float64",
        };
        write!(f, "{}", s)
    }
}

/// Word order of multi-word values on the wire. `Little` swaps whole
/// registers; the bits inside each register are untouched.
#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(bool),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Float32(f32),
    Float64(f64),
}

impl Value {
    pub fn display(&self, decimals: usize) -> String {
        match self {
            Value::Bool(v) => v.to_string(),
            Value::Int16(v) => v.to_string(),
            Value::UInt16(v) => v.to_string(),
            Value::Int32(v) => v.to_string(),
            Value::UInt32(v) => v.to_string(),
            Value::Float32(v) => format!("{:.*}", decimals, v),
            Value::Float64(v) => format!("{:.*}", decimals, v),
        }
    }
}

fn combine32(words: &[u16]) -> u32 {
    ((words[0] as u32) << 16) + (words[1] as u32)
}

fn combine64(words: &[u16]) -> u64 {
    ((words[0] as u64) << 48)
        + ((words[1] as u64) << 32)
        + ((words[2] as u64) << 16)
        + (words[3] as u64)
}

fn split32(val: u32) -> Vec<u16> {
    vec![((val & 0xFFFF0000) >> 16) as u16, (val & 0x0000FFFF) as u16]
}

fn split64(val: u64) -> Vec<u16> {
    vec![
        ((val & 0xFFFF000000000000) >> 48) as u16,
        ((val & 0x0000FFFF00000000) >> 32) as u16,
        ((val & 0x00000000FFFF0000) >> 16) as u16,
        (val & 0x000000000000FFFF) as u16,
    ]
}

/// Interpret one value group. `words` must hold at least one full group;
/// excess words are ignored.
pub fn decode(words: &[u16], r#type: DataType, endianness: Endianness) -> anyhow::Result<Value> {
    let needed = r#type.registers_needed();
    if words.len() < needed {
        return Err(anyhow!(
            "{} needs {} registers, got {}.",
            r#type,
            needed,
            words.len()
        ));
    }
    let mut group = words[..needed].to_vec();
    if endianness == Endianness::Little {
        group.reverse();
    }
    Ok(match r#type {
        DataType::Bool => Value::Bool(group[0] != 0),
        DataType::Int16 => Value::Int16(group[0] as i16),
        DataType::UInt16 => Value::UInt16(group[0]),
        DataType::Int32 => Value::Int32(combine32(&group) as i32),
        DataType::UInt32 => Value::UInt32(combine32(&group)),
        DataType::Float32 => Value::Float32(f32::from_bits(combine32(&group))),
        DataType::Float64 => Value::Float64(f64::from_bits(combine64(&group))),
    })
}

/// Decode a block group by group and join the rendered values with `", "`.
/// An incomplete trailing group is skipped.
pub fn format_values(
    words: &[u16],
    r#type: DataType,
    endianness: Endianness,
    decimals: usize,
) -> String {
    words
        .chunks_exact(r#type.registers_needed())
        .filter_map(|group| decode(group, r#type, endianness).ok())
        .map(|value| value.display(decimals))
        .join(", ")
}

pub fn format_bits(bits: &[bool]) -> String {
    bits.iter().map(|bit| bit.to_string()).join(", ")
}

/// Parse `text` into big-endian register words. Integer input is rounded to
/// the nearest integer and clamped to the type range without complaint; the
/// strict gate is [`validate`].
pub fn encode(text: &str, r#type: DataType) -> anyhow::Result<Vec<u16>> {
    let text = text.trim();
    Ok(match r#type {
        DataType::Bool => {
            let on = matches!(text.to_ascii_lowercase().as_str(), "1" | "true");
            vec![on as u16]
        }
        DataType::Int16 => {
            let val = text.parse::<f64>()?.round();
            let val = val.clamp(i16::MIN as f64, i16::MAX as f64) as i16;
            vec![val as u16]
        }
        DataType::UInt16 => {
            let val = text.parse::<f64>()?.round();
            vec![val.clamp(0.0, u16::MAX as f64) as u16]
        }
        DataType::Int32 => {
            let val = text.parse::<f64>()?.round();
            let val = val.clamp(i32::MIN as f64, i32::MAX as f64) as i32;
            split32(val as u32)
        }
        DataType::UInt32 => {
            let val = text.parse::<f64>()?.round();
            split32(val.clamp(0.0, u32::MAX as f64) as u32)
        }
        DataType::Float32 => split32(text.parse::<f32>()?.to_bits()),
        DataType::Float64 => split64(text.parse::<f64>()?.to_bits()),
    })
}

/// Apply the configured word order to an encoded group.
pub fn reorder(mut words: Vec<u16>, endianness: Endianness) -> Vec<u16> {
    if endianness == Endianness::Little {
        words.reverse();
    }
    words
}

/// Largest magnitude accepted for Float32 input. Sits just above
/// `f32::MAX`, so the boundary value written with seven significant
/// digits still passes.
const FLOAT32_INPUT_LIMIT: f64 = 3.4028235e38;

/// Strict pre-write gate. Unlike [`encode`], out-of-range integers and
/// fractional integer input are rejected instead of clamped.
pub fn validate(text: &str, r#type: DataType) -> bool {
    let text = text.trim();
    if text.is_empty() {
        return false;
    }
    match r#type {
        DataType::Bool => matches!(
            text.to_ascii_lowercase().as_str(),
            "0" | "1" | "true" | "false"
        ),
        DataType::Int16 => text
            .parse::<i64>()
            .is_ok_and(|val| (i16::MIN as i64..=i16::MAX as i64).contains(&val)),
        DataType::UInt16 => text
            .parse::<i64>()
            .is_ok_and(|val| (0..=u16::MAX as i64).contains(&val)),
        DataType::Int32 => text
            .parse::<i64>()
            .is_ok_and(|val| (i32::MIN as i64..=i32::MAX as i64).contains(&val)),
        DataType::UInt32 => text
            .parse::<i64>()
            .is_ok_and(|val| (0..=u32::MAX as i64).contains(&val)),
        DataType::Float32 => text
            .parse::<f64>()
            .is_ok_and(|val| val.is_finite() && val.abs() <= FLOAT32_INPUT_LIMIT),
        DataType::Float64 => text.parse::<f64>().is_ok_and(|val| val.is_finite()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ut_registers_needed() {
        assert_eq!(DataType::Bool.registers_needed(), 1);
        assert_eq!(DataType::Int16.registers_needed(), 1);
        assert_eq!(DataType::UInt16.registers_needed(), 1);
        assert_eq!(DataType::Int32.registers_needed(), 2);
        assert_eq!(DataType::UInt32.registers_needed(), 2);
        assert_eq!(DataType::Float32.registers_needed(), 2);
        assert_eq!(DataType::Float64.registers_needed(), 4);
    }

    #[test]
    fn ut_is_primary() {
        assert!(DataType::UInt16.is_primary(0));
        assert!(DataType::UInt16.is_primary(1));
        assert!(DataType::Int32.is_primary(0));
        assert!(!DataType::Int32.is_primary(1));
        assert!(DataType::Int32.is_primary(2));
        assert!(DataType::Float64.is_primary(0));
        assert!(!DataType::Float64.is_primary(1));
        assert!(!DataType::Float64.is_primary(2));
        assert!(!DataType::Float64.is_primary(3));
        assert!(DataType::Float64.is_primary(4));
    }

    #[test]
    fn ut_decode_uint16() {
        let val = decode(&[1000], DataType::UInt16, Endianness::Big).unwrap();
        assert_eq!(val.display(4), "1000");
    }

    #[test]
    fn ut_decode_int16_sign() {
        let val = decode(&[0xFFFF], DataType::Int16, Endianness::Big).unwrap();
        assert_eq!(val, Value::Int16(-1));
        let val = decode(&[0x8000], DataType::Int16, Endianness::Big).unwrap();
        assert_eq!(val, Value::Int16(-32768));
    }

    #[test]
    fn ut_decode_missing_words() {
        assert!(decode(&[0x1234], DataType::Int32, Endianness::Big).is_err());
        assert!(decode(&[0, 0, 0], DataType::Float64, Endianness::Big).is_err());
    }

    #[test]
    fn ut_roundtrip_int32() {
        for text in ["-2147483648", "-1", "0", "2147483647"] {
            let words = encode(text, DataType::Int32).unwrap();
            let val = decode(&words, DataType::Int32, Endianness::Big).unwrap();
            assert_eq!(val.display(4), text);
        }
    }

    #[test]
    fn ut_roundtrip_float32() {
        let words = encode("3.14", DataType::Float32).unwrap();
        let val = decode(&words, DataType::Float32, Endianness::Big).unwrap();
        match val {
            Value::Float32(v) => assert!((v - 3.14).abs() < 1e-4),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn ut_roundtrip_float64() {
        let words = encode("-123456.789015625", DataType::Float64).unwrap();
        assert_eq!(words.len(), 4);
        let val = decode(&words, DataType::Float64, Endianness::Big).unwrap();
        assert_eq!(val, Value::Float64(-123456.789015625));
    }

    #[test]
    fn ut_endianness_symmetry() {
        let big = encode("305419896", DataType::UInt32).unwrap();
        assert_eq!(big, vec![0x1234, 0x5678]);
        let little = reorder(big.clone(), Endianness::Little);
        assert_eq!(little, vec![0x5678, 0x1234]);
        assert_eq!(
            decode(&little, DataType::UInt32, Endianness::Little).unwrap(),
            decode(&big, DataType::UInt32, Endianness::Big).unwrap()
        );
    }

    #[test]
    fn ut_encode_clamps() {
        assert_eq!(encode("70000", DataType::UInt16).unwrap(), vec![65535]);
        assert_eq!(encode("-5", DataType::UInt16).unwrap(), vec![0]);
        assert_eq!(encode("40000", DataType::Int16).unwrap(), vec![32767]);
        assert_eq!(
            encode("4294967296", DataType::UInt32).unwrap(),
            vec![0xFFFF, 0xFFFF]
        );
    }

    #[test]
    fn ut_encode_rounds() {
        assert_eq!(encode("1.6", DataType::UInt16).unwrap(), vec![2]);
        assert_eq!(encode("-1.5", DataType::Int16).unwrap(), vec![0xFFFE]);
    }

    #[test]
    fn ut_encode_bool() {
        assert_eq!(encode("true", DataType::Bool).unwrap(), vec![1]);
        assert_eq!(encode("1", DataType::Bool).unwrap(), vec![1]);
        assert_eq!(encode("false", DataType::Bool).unwrap(), vec![0]);
        assert_eq!(encode("0", DataType::Bool).unwrap(), vec![0]);
    }

    #[test]
    fn ut_validate_int16_bounds() {
        assert!(validate("32767", DataType::Int16));
        assert!(!validate("32768", DataType::Int16));
        assert!(validate("-32768", DataType::Int16));
        assert!(!validate("-32769", DataType::Int16));
    }

    #[test]
    fn ut_validate_uint16_bounds() {
        assert!(validate("0", DataType::UInt16));
        assert!(validate("65535", DataType::UInt16));
        assert!(!validate("65536", DataType::UInt16));
        assert!(!validate("-1", DataType::UInt16));
    }

    #[test]
    fn ut_validate_rejects_garbage() {
        assert!(!validate("", DataType::UInt16));
        assert!(!validate("   ", DataType::UInt16));
        assert!(!validate("abc", DataType::Int32));
        assert!(!validate("1.5", DataType::Int32));
        assert!(!validate("maybe", DataType::Bool));
    }

    #[test]
    fn ut_validate_bool_case_insensitive() {
        assert!(validate("TRUE", DataType::Bool));
        assert!(validate("False", DataType::Bool));
        assert!(validate(" 1 ", DataType::Bool));
    }

    #[test]
    fn ut_validate_float_bounds() {
        assert!(validate("3.4028235e38", DataType::Float32));
        assert!(validate("-3.4028235e38", DataType::Float32));
        assert!(!validate("3.4028236e38", DataType::Float32));
        assert!(!validate("3.5e38", DataType::Float32));
        assert!(!validate("inf", DataType::Float32));
        assert!(!validate("1.8e308", DataType::Float64));
        assert!(validate("-1.5e300", DataType::Float64));
    }

    #[test]
    fn ut_format_values_skips_partial_group() {
        let words = vec![0x0000, 0x0001, 0x0000, 0x0002, 0xDEAD];
        assert_eq!(
            format_values(&words, DataType::UInt32, Endianness::Big, 4),
            "1, 2"
        );
    }

    #[test]
    fn ut_format_values_floats() {
        let words = encode("1.5", DataType::Float32).unwrap();
        assert_eq!(
            format_values(&words, DataType::Float32, Endianness::Big, 4),
            "1.5000"
        );
        assert_eq!(
            format_values(&words, DataType::Float32, Endianness::Big, 6),
            "1.500000"
        );
    }

    #[test]
    fn ut_format_bits() {
        assert_eq!(format_bits(&[true, false, true]), "true, false, true");
    }
}
