use crate::lowlevel::{EndRequest, FastcgiRecord, FastcgiRecordBody};
use crate::s11n::{ProtocolStatus, MAX_CONTENT_LEN};

use bytes::Bytes;

/// What a handler hands back: CGI response headers and the body.
#[derive(Debug, Clone)]
pub struct FastcgiResponse {
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    raw: bool,
}

impl FastcgiResponse {
    /// An empty `text/html` response.
    pub fn new() -> FastcgiResponse {
        FastcgiResponse {
            headers: vec![("Content-Type".to_owned(), "text/html".to_owned())],
            body: Vec::new(),
            raw: false,
        }
    }

    pub fn with_body<B: Into<Vec<u8>>>(body: B) -> FastcgiResponse {
        let mut response = FastcgiResponse::new();
        response.body = body.into();
        response
    }

    /// Output that already contains its own CGI header block, sent untouched.
    pub fn raw<B: Into<Vec<u8>>>(output: B) -> FastcgiResponse {
        FastcgiResponse {
            headers: Vec::new(),
            body: output.into(),
            raw: true,
        }
    }

    /// Sets a header, replacing any existing header with the same (case-insensitive) name.
    pub fn set_header<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    pub fn clear_header(&mut self, name: &str) {
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// The bytes of the STDOUT stream: header lines, a blank line, then the body.
    pub fn into_bytes(self) -> Bytes {
        if self.raw {
            return Bytes::from(self.body);
        }
        let header_len: usize = self.headers.iter().map(|(k, v)| k.len() + v.len() + 4).sum();
        let mut out = Vec::with_capacity(header_len + 2 + self.body.len());
        for (key, value) in &self.headers {
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        Bytes::from(out)
    }
}

impl Default for FastcgiResponse {
    fn default() -> Self {
        FastcgiResponse::new()
    }
}

/// Splits `data` into records of at most 65535 bytes, followed by the empty
/// record that ends the stream.
pub fn stream_records<F>(request_id: u16, data: &Bytes, make: F) -> Vec<FastcgiRecord>
where
    F: Fn(Bytes) -> FastcgiRecordBody,
{
    let mut records = Vec::with_capacity(data.len() / MAX_CONTENT_LEN + 2);
    let mut offset = 0;
    while offset < data.len() {
        let end = usize::min(offset + MAX_CONTENT_LEN, data.len());
        records.push(FastcgiRecord {
            request_id,
            body: make(data.slice(offset..end)),
        });
        offset = end;
    }
    records.push(FastcgiRecord {
        request_id,
        body: make(Bytes::new()),
    });
    records
}

pub fn end_request(
    request_id: u16,
    app_status: u32,
    protocol_status: ProtocolStatus,
) -> FastcgiRecord {
    FastcgiRecord {
        request_id,
        body: FastcgiRecordBody::EndRequest(EndRequest {
            app_status,
            protocol_status,
        }),
    }
}

/// The outbound side of one request cycle.
#[derive(Debug, Clone)]
pub struct ResponseFrame {
    pub request_id: u16,
    pub body: Bytes,
}

impl ResponseFrame {
    pub fn new<B: Into<Bytes>>(request_id: u16, body: B) -> ResponseFrame {
        ResponseFrame {
            request_id,
            body: body.into(),
        }
    }

    /// STDOUT records for the body, the STDOUT terminator, and a successful END_REQUEST.
    pub fn into_records(self) -> Vec<FastcgiRecord> {
        let mut records = stream_records(self.request_id, &self.body, FastcgiRecordBody::Stdout);
        records.push(end_request(self.request_id, 0, ProtocolStatus::RequestComplete));
        records
    }

    /// Records reporting a failed request: the message on STDERR, an empty
    /// STDOUT stream, and END_REQUEST carrying `app_status`.
    pub fn failure_records(request_id: u16, app_status: u32, message: &str) -> Vec<FastcgiRecord> {
        let message = Bytes::copy_from_slice(message.as_bytes());
        let mut records = stream_records(request_id, &message, FastcgiRecordBody::Stderr);
        records.extend(stream_records(request_id, &Bytes::new(), FastcgiRecordBody::Stdout));
        records.push(end_request(request_id, app_status, ProtocolStatus::RequestComplete));
        records
    }
}
