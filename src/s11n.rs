//! s11n == serialization. Structs that match the bytes that make up FastCGI records.

use crate::error::{FastcgiError, Result};

use byteorder::{ByteOrder, NetworkEndian};

pub const FASTCGI_VERSION: u8 = 1;

pub const HEADER_LEN: usize = 8;

/// Largest content a single record can carry.
pub const MAX_CONTENT_LEN: usize = 0xFFFF;

/// Bit 0 of the BEGIN_REQUEST flags byte.
pub const FCGI_KEEP_CONN: u8 = 1;

enum_from_primitive! {
    #[repr(u8)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum RecordType {
        BeginRequest = 1,
        AbortRequest = 2,
        EndRequest = 3,
        Params = 4,
        Stdin = 5,
        Stdout = 6,
        Stderr = 7,
        Data = 8,
        GetValues = 9,
        GetValuesResult = 10,
        UnknownType = 11,
    }
}

enum_from_primitive! {
    #[repr(u16)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Role {
        Responder = 1,
        Authorizer = 2,
        Filter = 3,
    }
}

enum_from_primitive! {
    #[repr(u8)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ProtocolStatus {
        RequestComplete = 0,
        CantMultiplexConnections = 1,
        Overloaded = 2,
        UnknownRole = 3,
    }
}

/// The fixed 8-byte header in front of every record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub version: u8,
    pub record_type: u8,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
    pub reserved: u8,
}

impl RecordHeader {
    pub fn from_bytes(bytes: &[u8]) -> Result<RecordHeader> {
        if bytes.len() < HEADER_LEN {
            return Err(FastcgiError::MalformedHeader(bytes.len()));
        }
        Ok(RecordHeader {
            version: bytes[0],
            record_type: bytes[1],
            request_id: NetworkEndian::read_u16(&bytes[2..4]),
            content_length: NetworkEndian::read_u16(&bytes[4..6]),
            padding_length: bytes[6],
            reserved: bytes[7],
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.version;
        out[1] = self.record_type;
        NetworkEndian::write_u16(&mut out[2..4], self.request_id);
        NetworkEndian::write_u16(&mut out[4..6], self.content_length);
        out[6] = self.padding_length;
        out[7] = self.reserved;
        out
    }

    /// Bytes following the header that belong to this record.
    pub fn body_len(&self) -> usize {
        self.content_length as usize + self.padding_length as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BeginRequestBody {
    pub role: u16,
    pub flags: u8,
}

impl BeginRequestBody {
    pub const LEN: usize = 8;

    pub fn from_bytes(bytes: &[u8]) -> Result<BeginRequestBody> {
        if bytes.len() < Self::LEN {
            return Err(FastcgiError::MalformedBeginRequest(bytes.len()));
        }
        Ok(BeginRequestBody {
            role: NetworkEndian::read_u16(&bytes[0..2]),
            flags: bytes[2],
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        NetworkEndian::write_u16(&mut out[0..2], self.role);
        out[2] = self.flags;
        out
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndRequestBody {
    pub app_status: u32,
    pub protocol_status: u8,
}

impl EndRequestBody {
    pub const LEN: usize = 8;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        NetworkEndian::write_u32(&mut out[0..4], self.app_status);
        out[4] = self.protocol_status;
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<EndRequestBody> {
        if bytes.len() < Self::LEN {
            return None;
        }
        Some(EndRequestBody {
            app_status: NetworkEndian::read_u32(&bytes[0..4]),
            protocol_status: bytes[4],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enum_primitive::FromPrimitive;

    #[test]
    fn header_fields_are_big_endian() {
        let bytes = [1, 5, 0x01, 0x02, 0x03, 0x04, 7, 0];
        let header = RecordHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.request_id, 0x0102);
        assert_eq!(header.content_length, 0x0304);
        assert_eq!(header.padding_length, 7);
        assert_eq!(header.body_len(), 0x0304 + 7);
        assert_eq!(header.to_bytes(), bytes);
    }

    #[test]
    fn short_header_is_malformed() {
        match RecordHeader::from_bytes(&[1, 1, 0]) {
            Err(FastcgiError::MalformedHeader(3)) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn begin_request_body() {
        let body = BeginRequestBody::from_bytes(&[0, 1, FCGI_KEEP_CONN, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(Role::from_u16(body.role), Some(Role::Responder));
        assert_eq!(body.flags & FCGI_KEEP_CONN, FCGI_KEEP_CONN);
        assert!(BeginRequestBody::from_bytes(&[0, 1, 0]).is_err());
    }

    #[test]
    fn end_request_body_layout() {
        let body = EndRequestBody {
            app_status: 0x0A0B0C0D,
            protocol_status: ProtocolStatus::CantMultiplexConnections as u8,
        };
        assert_eq!(body.to_bytes(), [0x0A, 0x0B, 0x0C, 0x0D, 1, 0, 0, 0]);
        assert_eq!(EndRequestBody::from_bytes(&body.to_bytes()), Some(body));
    }

    #[test]
    fn record_type_codes() {
        assert_eq!(RecordType::from_u8(4), Some(RecordType::Params));
        assert_eq!(RecordType::from_u8(11), Some(RecordType::UnknownType));
        assert_eq!(RecordType::from_u8(12), None);
        assert_eq!(RecordType::from_u8(0), None);
    }
}
