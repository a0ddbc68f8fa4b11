//! Binary packing of scripted protocol records
//!
//! Format codes follow the familiar struct-module notation: an optional
//! byte-order prefix, then field codes with optional decimal repeat
//! counts, e.g. `!BBH5B` for a SOCKS4 connect request.

use crate::common::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Big,
    Little,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Pad,
    Unsigned(usize),
    Signed(usize),
}

/// Pack `values` according to `format`
pub fn pack(format: &str, values: &[i64]) -> Result<Vec<u8>> {
    let (order, fields) = parse_format(format)?;

    let needed = fields.iter().filter(|f| !matches!(f, Field::Pad)).count();
    if needed != values.len() {
        return Err(Error::Script(format!(
            "format '{}' takes {} values, got {}",
            format,
            needed,
            values.len()
        )));
    }

    let mut out = Vec::new();
    let mut values = values.iter();
    for field in fields {
        let (width, signed) = match field {
            Field::Pad => {
                out.push(0);
                continue;
            }
            Field::Unsigned(w) => (w, false),
            Field::Signed(w) => (w, true),
        };
        let value = *values
            .next()
            .ok_or_else(|| Error::Internal("value count checked above".to_string()))?;
        check_range(format, value, width, signed)?;

        let bytes = value.to_be_bytes();
        let be = &bytes[8 - width..];
        match order {
            ByteOrder::Big => out.extend_from_slice(be),
            ByteOrder::Little => out.extend(be.iter().rev()),
        }
    }
    Ok(out)
}

fn parse_format(format: &str) -> Result<(ByteOrder, Vec<Field>)> {
    let mut chars = format.chars().peekable();
    let order = match chars.peek() {
        Some('!') | Some('>') => {
            chars.next();
            ByteOrder::Big
        }
        Some('<') => {
            chars.next();
            ByteOrder::Little
        }
        Some('=') | Some('@') => {
            chars.next();
            if cfg!(target_endian = "big") {
                ByteOrder::Big
            } else {
                ByteOrder::Little
            }
        }
        _ => ByteOrder::Big,
    };

    let mut fields = Vec::new();
    let mut count: Option<usize> = None;
    for c in chars {
        if let Some(digit) = c.to_digit(10) {
            count = Some(count.unwrap_or(0) * 10 + digit as usize);
            continue;
        }
        let field = match c {
            'x' => Field::Pad,
            'B' => Field::Unsigned(1),
            'b' => Field::Signed(1),
            'H' => Field::Unsigned(2),
            'h' => Field::Signed(2),
            'I' | 'L' => Field::Unsigned(4),
            'i' | 'l' => Field::Signed(4),
            'Q' => Field::Unsigned(8),
            'q' => Field::Signed(8),
            c if c.is_whitespace() => continue,
            other => {
                return Err(Error::Script(format!(
                    "unsupported format code '{}' in '{}'",
                    other, format
                )))
            }
        };
        let repeat = count.take().unwrap_or(1);
        fields.extend(std::iter::repeat(field).take(repeat));
    }
    if count.is_some() {
        return Err(Error::Script(format!(
            "format '{}' ends with a repeat count",
            format
        )));
    }
    Ok((order, fields))
}

fn check_range(format: &str, value: i64, width: usize, signed: bool) -> Result<()> {
    let bits = (width * 8) as u32;
    let ok = match (signed, bits) {
        (_, 64) => signed || value >= 0,
        (true, b) => {
            let half = 1i64 << (b - 1);
            (-half..half).contains(&value)
        }
        (false, b) => (0..(1i64 << b)).contains(&value),
    };
    if ok {
        Ok(())
    } else {
        Err(Error::Script(format!(
            "value {} does not fit a {}-byte {} field in '{}'",
            value,
            width,
            if signed { "signed" } else { "unsigned" },
            format
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socks4_request() {
        let bytes = pack("!BBH5B", &[4, 1, 5000, 127, 0, 0, 1, 0]).unwrap();
        assert_eq!(bytes, vec![4, 1, 0x13, 0x88, 127, 0, 0, 1, 0]);
    }

    #[test]
    fn test_socks5_request() {
        let bytes = pack("!8BH", &[5, 1, 0, 1, 127, 0, 0, 1, 5000]).unwrap();
        assert_eq!(bytes, vec![5, 1, 0, 1, 127, 0, 0, 1, 0x13, 0x88]);
    }

    #[test]
    fn test_little_endian_and_padding() {
        let bytes = pack("<Hxi", &[0x0102, -2]).unwrap();
        assert_eq!(bytes, vec![0x02, 0x01, 0x00, 0xfe, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_value_count_mismatch() {
        let err = pack("!BBH4B", &[0, 90, 5000]).unwrap_err();
        assert!(err.to_string().contains("takes 7 values, got 3"));
    }

    #[test]
    fn test_out_of_range() {
        assert!(pack("!B", &[256]).is_err());
        assert!(pack("!B", &[-1]).is_err());
        assert!(pack("!b", &[-128]).is_ok());
        assert!(pack("!H", &[65536]).is_err());
    }

    #[test]
    fn test_unsupported_code() {
        let err = pack("!4s", &[0]).unwrap_err();
        assert!(err.to_string().contains("unsupported format code 's'"));
        assert!(pack("!B2", &[1]).is_err());
    }
}
