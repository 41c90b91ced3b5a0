//! The length-prefixed name-value list carried by PARAMS (and GET_VALUES) records.

use crate::error::{FastcgiError, Result};

use byteorder::{ByteOrder, NetworkEndian};
use bytes::{BufMut, BytesMut};

use std::collections::HashMap;

/// Decoded CGI environment of a request.
pub type ParameterSet = HashMap<String, String>;

/// Largest length the 4-byte form can express.
pub const MAX_NAME_VALUE_LEN: usize = 0x7FFF_FFFF;

fn read_len(buf: &[u8], pos: &mut usize) -> Option<usize> {
    let first_byte = *buf.get(*pos)?;
    if first_byte < 0x80 {
        *pos += 1;
        Some(first_byte as usize)
    } else {
        let field = buf.get(*pos..*pos + 4)?;
        *pos += 4;
        Some((NetworkEndian::read_u32(field) & 0x7FFF_FFFF) as usize)
    }
}

fn truncated(offset: usize) -> FastcgiError {
    FastcgiError::TruncatedNameValue { offset }
}

fn write_len(buf: &mut BytesMut, len: usize) -> Result<()> {
    if len < 0x80 {
        buf.put_u8(len as u8);
    } else if len <= MAX_NAME_VALUE_LEN {
        buf.put_u32(len as u32 | 0x8000_0000);
    } else {
        return Err(FastcgiError::LengthOverflow {
            field: "name-value length",
            len,
        });
    }
    Ok(())
}

/// Walks `buf` from the start and inserts every pair into `params`.
/// A name that is already present is overwritten.
pub fn read_params(buf: &[u8], params: &mut ParameterSet) -> Result<()> {
    let mut pos = 0;
    while pos < buf.len() {
        let entry_start = pos;
        let (name_len, value_len) = match (read_len(buf, &mut pos), read_len(buf, &mut pos)) {
            (Some(name_len), Some(value_len)) => (name_len, value_len),
            _ => return Err(truncated(entry_start)),
        };
        let name_end = pos
            .checked_add(name_len)
            .filter(|&end| end <= buf.len())
            .ok_or_else(|| truncated(entry_start))?;
        let value_end = name_end
            .checked_add(value_len)
            .filter(|&end| end <= buf.len())
            .ok_or_else(|| truncated(entry_start))?;
        let name = String::from_utf8_lossy(&buf[pos..name_end]).into_owned();
        let value = String::from_utf8_lossy(&buf[name_end..value_end]).into_owned();
        debug!("param ({}, {})", name, value);
        params.insert(name, value);
        pos = value_end;
    }
    Ok(())
}

pub fn decode_params(buf: &[u8]) -> Result<ParameterSet> {
    let mut params = ParameterSet::new();
    read_params(buf, &mut params)?;
    Ok(params)
}

/// Appends one encoded pair, choosing the 1-byte length form whenever it fits.
pub fn write_param(buf: &mut BytesMut, name: &[u8], value: &[u8]) -> Result<()> {
    write_len(buf, name.len())?;
    write_len(buf, value.len())?;
    buf.extend_from_slice(name);
    buf.extend_from_slice(value);
    Ok(())
}

pub fn encode_params<'a, I>(params: I) -> Result<BytesMut>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut out = BytesMut::new();
    for (name, value) in params {
        write_param(&mut out, name.as_bytes(), value.as_bytes())?;
    }
    Ok(out)
}
