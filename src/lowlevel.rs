use crate::error::{FastcgiError, Result};
use crate::s11n::*;

use bytes::{Buf, Bytes, BytesMut};
use enum_primitive::FromPrimitive;
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastcgiRecord {
    pub request_id: u16,
    pub body: FastcgiRecordBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FastcgiRecordBody {
    BeginRequest(BeginRequest),
    AbortRequest,
    EndRequest(EndRequest),
    /// Raw name-value bytes; a pair may continue in the next PARAMS record.
    Params(Bytes),
    Stdin(Bytes),
    Stdout(Bytes),
    Stderr(Bytes),
    Data(Bytes),
    GetValues(Bytes),
    UnknownTypeResponse(u8),
    UnknownType(u8, Bytes), // this one is the incoming record
}

impl FastcgiRecordBody {
    pub fn record_type(&self) -> u8 {
        let typ = match *self {
            FastcgiRecordBody::BeginRequest(_) => RecordType::BeginRequest,
            FastcgiRecordBody::AbortRequest => RecordType::AbortRequest,
            FastcgiRecordBody::EndRequest(_) => RecordType::EndRequest,
            FastcgiRecordBody::Params(_) => RecordType::Params,
            FastcgiRecordBody::Stdin(_) => RecordType::Stdin,
            FastcgiRecordBody::Stdout(_) => RecordType::Stdout,
            FastcgiRecordBody::Stderr(_) => RecordType::Stderr,
            FastcgiRecordBody::Data(_) => RecordType::Data,
            FastcgiRecordBody::GetValues(_) => RecordType::GetValues,
            FastcgiRecordBody::UnknownTypeResponse(_) => RecordType::UnknownType,
            FastcgiRecordBody::UnknownType(code, _) => return code,
        };
        typ as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginRequest {
    /// Raw role code. Only `Role::Responder` is served, but other values are passed along.
    pub role: u16,
    pub keep_connection: bool,
}

impl BeginRequest {
    pub fn role(&self) -> Option<Role> {
        Role::from_u16(self.role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndRequest {
    pub app_status: u32,
    pub protocol_status: ProtocolStatus,
}

/// Padding that brings `content_len` up to the next multiple of 8.
pub fn padding_len(content_len: usize) -> usize {
    (8 - (content_len % 8)) % 8
}

pub fn decode_header(bytes: &[u8]) -> Result<RecordHeader> {
    RecordHeader::from_bytes(bytes)
}

pub fn encode_header(
    record_type: RecordType,
    request_id: u16,
    content_length: usize,
    padding_length: usize,
) -> Result<[u8; HEADER_LEN]> {
    if content_length > MAX_CONTENT_LEN {
        return Err(FastcgiError::LengthOverflow {
            field: "contentLength",
            len: content_length,
        });
    }
    if padding_length > u8::MAX as usize {
        return Err(FastcgiError::LengthOverflow {
            field: "paddingLength",
            len: padding_length,
        });
    }
    let header = RecordHeader {
        version: FASTCGI_VERSION,
        record_type: record_type as u8,
        request_id,
        content_length: content_length as u16,
        padding_length: padding_length as u8,
        reserved: 0,
    };
    Ok(header.to_bytes())
}

/// Consumes the content and padding of the record described by `header` from
/// `buf`, which must already be past the header. Only the content is returned.
pub fn read_body(buf: &mut BytesMut, header: &RecordHeader) -> Result<Bytes> {
    let wanted = header.body_len();
    if buf.len() < wanted {
        return Err(FastcgiError::ShortRead {
            expected: wanted,
            received: buf.len(),
        });
    }
    let content = buf.split_to(header.content_length as usize).freeze();
    buf.advance(header.padding_length as usize);
    Ok(content)
}

/// Writes one record with content and padding. `content` must fit in a single record.
pub fn write_record(
    buf: &mut BytesMut,
    record_type: RecordType,
    request_id: u16,
    content: &[u8],
) -> Result<()> {
    let padding = padding_len(content.len());
    let header = encode_header(record_type, request_id, content.len(), padding)?;
    buf.reserve(HEADER_LEN + content.len() + padding);
    buf.extend_from_slice(&header);
    buf.extend_from_slice(content);
    buf.extend_from_slice(&[0u8; 8][..padding]);
    Ok(())
}

fn read_begin_request_body(content: &[u8]) -> Result<BeginRequest> {
    let raw = BeginRequestBody::from_bytes(content)?;
    Ok(BeginRequest {
        role: raw.role,
        keep_connection: (raw.flags & FCGI_KEEP_CONN) == FCGI_KEEP_CONN,
    })
}

fn decode_body(header: &RecordHeader, content: Bytes) -> Result<FastcgiRecordBody> {
    let record_type = match RecordType::from_u8(header.record_type) {
        Some(typ) => typ,
        None => {
            warn!("unknown record type {}", header.record_type);
            return Ok(FastcgiRecordBody::UnknownType(header.record_type, content));
        }
    };

    let body = match record_type {
        RecordType::BeginRequest => {
            FastcgiRecordBody::BeginRequest(read_begin_request_body(&content)?)
        }
        RecordType::AbortRequest => FastcgiRecordBody::AbortRequest,
        RecordType::Params => FastcgiRecordBody::Params(content),
        RecordType::Stdin => FastcgiRecordBody::Stdin(content),
        RecordType::Data => FastcgiRecordBody::Data(content),
        RecordType::GetValues => FastcgiRecordBody::GetValues(content),
        RecordType::EndRequest
        | RecordType::Stdout
        | RecordType::Stderr
        | RecordType::GetValuesResult
        | RecordType::UnknownType => {
            error!("illegal record type {:?} from FastCGI client", record_type);
            return Err(FastcgiError::UnexpectedRecordType(header.record_type));
        }
    };
    Ok(body)
}

/// Record-level codec: bytes in, `FastcgiRecord`s out, and the reverse for the
/// record types an application sends.
#[derive(Debug, Default)]
pub struct FastcgiLowlevelCodec;

impl Decoder for FastcgiLowlevelCodec {
    type Item = FastcgiRecord;
    type Error = FastcgiError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<FastcgiRecord>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let header = decode_header(&buf[..HEADER_LEN])?;

        if header.version != FASTCGI_VERSION {
            error!("unexpected FCGI version {}", header.version);
            return Err(FastcgiError::UnsupportedVersion(header.version));
        }

        let record_len = HEADER_LEN + header.body_len();
        if buf.len() < record_len {
            debug!("insufficient buffer for record: {} of {} bytes", buf.len(), record_len);
            buf.reserve(record_len - buf.len());
            return Ok(None);
        }

        buf.advance(HEADER_LEN);
        let content = read_body(buf, &header)?;

        debug!(
            "request id: {}; record type: {}, {} bytes of content",
            header.request_id, header.record_type, header.content_length
        );

        Ok(Some(FastcgiRecord {
            request_id: header.request_id,
            body: decode_body(&header, content)?,
        }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<FastcgiRecord>> {
        if let Some(record) = self.decode(buf)? {
            return Ok(Some(record));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let expected = match decode_header(buf) {
            Ok(header) => HEADER_LEN + header.body_len(),
            Err(_) => HEADER_LEN,
        };
        error!("connection closed inside a record ({} of {} bytes)", buf.len(), expected);
        Err(FastcgiError::ShortRead {
            expected,
            received: buf.len(),
        })
    }
}

impl Encoder<FastcgiRecord> for FastcgiLowlevelCodec {
    type Error = FastcgiError;

    fn encode(&mut self, msg: FastcgiRecord, buf: &mut BytesMut) -> Result<()> {
        match msg.body {
            FastcgiRecordBody::Stdout(data) => {
                write_record(buf, RecordType::Stdout, msg.request_id, &data)
            }
            FastcgiRecordBody::Stderr(data) => {
                write_record(buf, RecordType::Stderr, msg.request_id, &data)
            }
            FastcgiRecordBody::EndRequest(end) => {
                let body = EndRequestBody {
                    app_status: end.app_status,
                    protocol_status: end.protocol_status as u8,
                };
                write_record(buf, RecordType::EndRequest, msg.request_id, &body.to_bytes())
            }
            FastcgiRecordBody::UnknownTypeResponse(typ) => {
                write_record(buf, RecordType::UnknownType, 0, &[typ, 0, 0, 0, 0, 0, 0, 0])
            }
            other => {
                error!("illegal record {:?} from FastCGI application", other);
                Err(FastcgiError::UnexpectedRecordType(other.record_type()))
            }
        }
    }
}
