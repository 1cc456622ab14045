//! A minimal protobuf wire-format reader, just capable enough to
//! extract a single nested string field from an encoded message
//! without depending on generated message types. The stream
//! coordinator (praefect-proxy) uses this to read the routing header
//! out of the first request frame without decoding (or even fully
//! understanding) the rest of the RPC payload — spec.md §1 is explicit
//! that the core "does not parse or understand the bytes flowing
//! between client and back-end beyond extracting a small routing
//! header."

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("truncated protobuf varint")]
    TruncatedVarint,
    #[error("truncated protobuf field")]
    TruncatedField,
    #[error("field path did not resolve to a string field")]
    NotFound,
    #[error("field resolved to a non length-delimited wire type")]
    WrongWireType,
}

/// Reads the string value found by walking `path`, a sequence of
/// protobuf field numbers, through possibly-nested embedded messages.
/// `path = [3]` means "top-level field 3, as a string". `path = [1, 2]`
/// means "embedded message field 1, and within it, string field 2".
pub fn extract_string(mut buf: &[u8], path: &[u32]) -> Result<String, WireError> {
    let Some((&field, rest)) = path.split_first() else {
        return Err(WireError::NotFound);
    };

    loop {
        let Some((tag, tag_len)) = read_varint(buf) else {
            return Err(WireError::NotFound);
        };
        let field_num = (tag >> 3) as u32;
        let wire_type = tag & 0x7;
        buf = &buf[tag_len..];

        if field_num != field {
            skip_field(wire_type, &mut buf)?;
            continue;
        }

        // Length-delimited: either the string itself, or (for a
        // non-final path segment) a nested message to recurse into.
        if wire_type != 2 {
            return Err(WireError::WrongWireType);
        }
        let Some((len, len_len)) = read_varint(buf) else {
            return Err(WireError::TruncatedVarint);
        };
        buf = &buf[len_len..];
        let len = len as usize;
        if buf.len() < len {
            return Err(WireError::TruncatedField);
        }
        let (value, _) = buf.split_at(len);

        return if rest.is_empty() {
            String::from_utf8(value.to_vec()).map_err(|_| WireError::NotFound)
        } else {
            extract_string(value, rest)
        };
    }
}

fn read_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in buf.iter().enumerate() {
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        if i == 9 {
            return None;
        }
    }
    None
}

fn skip_field(wire_type: u64, buf: &mut &[u8]) -> Result<(), WireError> {
    match wire_type {
        0 => {
            let (_, len) = read_varint(buf).ok_or(WireError::TruncatedVarint)?;
            *buf = &buf[len..];
        }
        1 => {
            if buf.len() < 8 {
                return Err(WireError::TruncatedField);
            }
            *buf = &buf[8..];
        }
        2 => {
            let (len, len_len) = read_varint(buf).ok_or(WireError::TruncatedVarint)?;
            let total = len_len + len as usize;
            if buf.len() < total {
                return Err(WireError::TruncatedField);
            }
            *buf = &buf[total..];
        }
        5 => {
            if buf.len() < 4 {
                return Err(WireError::TruncatedField);
            }
            *buf = &buf[4..];
        }
        _ => return Err(WireError::WrongWireType),
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode_string_field(field_num: u32, value: &str) -> Vec<u8> {
        let mut out = Vec::new();
        encode_varint(((field_num as u64) << 3) | 2, &mut out);
        encode_varint(value.len() as u64, &mut out);
        out.extend_from_slice(value.as_bytes());
        out
    }

    fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
        loop {
            let mut byte = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if value == 0 {
                break;
            }
        }
    }

    #[test]
    fn extracts_a_top_level_string_field() {
        let msg = encode_string_field(3, "default/my-repo.git");
        assert_eq!(extract_string(&msg, &[3]).unwrap(), "default/my-repo.git");
    }

    #[test]
    fn skips_unrelated_fields_before_the_target() {
        let mut msg = encode_string_field(1, "ignored");
        msg.extend(encode_string_field(2, "relative/path.git"));
        assert_eq!(extract_string(&msg, &[2]).unwrap(), "relative/path.git");
    }

    #[test]
    fn recurses_into_nested_messages() {
        let inner = encode_string_field(2, "nested-value");
        let mut outer = Vec::new();
        encode_varint((1u64 << 3) | 2, &mut outer);
        encode_varint(inner.len() as u64, &mut outer);
        outer.extend_from_slice(&inner);

        assert_eq!(extract_string(&outer, &[1, 2]).unwrap(), "nested-value");
    }

    #[test]
    fn missing_field_is_not_found() {
        let msg = encode_string_field(1, "whatever");
        assert_eq!(extract_string(&msg, &[9]), Err(WireError::NotFound));
    }
}
