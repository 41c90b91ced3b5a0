//! Collects the records of one request until both input streams have ended.
//!
//! A connection serves one request at a time. While a request is pending,
//! records for any other request id are dropped; the pending state is never
//! touched by them. STDIN records are appended in arrival order.
//!
//! A finished request stays in the `Complete` state until [`RequestAssembler::reset`]
//! is called. A record arriving first discards it.

use crate::config::ServerConfig;
use crate::error::{FastcgiError, Result};
use crate::hi::handler::FastcgiRequest;
use crate::lowlevel::{FastcgiRecord, FastcgiRecordBody};
use crate::namevalue::{read_params, ParameterSet};
use crate::s11n::Role;

use bytes::{Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    Empty,
    AccumulatingParams,
    AccumulatingBody,
    Complete,
}

#[derive(Debug)]
struct PendingRequest {
    request_id: u16,
    role: u16,
    keep_connection: bool,
    params_buf: BytesMut,
    body: BytesMut,
    params_done: bool,
    stdin_done: bool,
}

impl PendingRequest {
    fn new(request_id: u16) -> PendingRequest {
        // No BEGIN_REQUEST seen (yet): assume a responder on a kept connection.
        PendingRequest {
            request_id,
            role: Role::Responder as u16,
            keep_connection: true,
            params_buf: BytesMut::new(),
            body: BytesMut::new(),
            params_done: false,
            stdin_done: false,
        }
    }

    fn is_complete(&self) -> bool {
        self.params_done && self.stdin_done
    }
}

/// What feeding one record produced.
#[derive(Debug)]
pub enum AssemblerEvent {
    /// The record was absorbed; more are needed.
    Incomplete,
    /// The record belongs to another request id and was dropped.
    Ignored { request_id: u16 },
    /// A BEGIN_REQUEST for another id arrived while a request is pending.
    Busy { request_id: u16 },
    /// The web server aborted the pending request.
    Aborted { request_id: u16 },
    Complete(FastcgiRequest),
}

#[derive(Debug)]
pub struct RequestAssembler {
    pending: Option<PendingRequest>,
    max_params_bytes: usize,
    max_stdin_bytes: usize,
}

impl RequestAssembler {
    pub fn new(config: &ServerConfig) -> RequestAssembler {
        RequestAssembler {
            pending: None,
            max_params_bytes: config.max_params_bytes,
            max_stdin_bytes: config.max_stdin_bytes,
        }
    }

    pub fn current_id(&self) -> Option<u16> {
        self.pending.as_ref().map(|p| p.request_id)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn state(&self) -> AssemblerState {
        match self.pending {
            None => AssemblerState::Empty,
            Some(ref p) if p.is_complete() => AssemblerState::Complete,
            Some(ref p) if p.params_done => AssemblerState::AccumulatingBody,
            Some(_) => AssemblerState::AccumulatingParams,
        }
    }

    /// Forgets the current request, complete or not.
    pub fn reset(&mut self) {
        self.pending = None;
    }

    /// Feeds one record with a nonzero request id.
    pub fn feed(&mut self, record: FastcgiRecord) -> Result<AssemblerEvent> {
        let request_id = record.request_id;
        if let (AssemblerState::Complete, Some(done)) = (self.state(), self.current_id()) {
            debug!("request {} was not reset; discarding it", done);
            self.reset();
        }
        match self.current_id() {
            Some(current) if current != request_id => {
                return Ok(match record.body {
                    FastcgiRecordBody::BeginRequest(_) => {
                        warn!("request {} arrived while {} is pending", request_id, current);
                        AssemblerEvent::Busy { request_id }
                    }
                    _ => {
                        warn!(
                            "dropping {} record for request {}; request {} is pending",
                            record.body.record_type(),
                            request_id,
                            current
                        );
                        AssemblerEvent::Ignored { request_id }
                    }
                });
            }
            Some(_) => (),
            None => {
                if let FastcgiRecordBody::AbortRequest = record.body {
                    debug!("abort for request {} which is not pending", request_id);
                    return Ok(AssemblerEvent::Ignored { request_id });
                }
                debug!("starting request {}", request_id);
                self.pending = Some(PendingRequest::new(request_id));
            }
        }

        let (max_params, max_stdin) = (self.max_params_bytes, self.max_stdin_bytes);
        let pending = match self.pending.as_mut() {
            Some(pending) => pending,
            None => return Ok(AssemblerEvent::Incomplete),
        };

        match record.body {
            FastcgiRecordBody::BeginRequest(begin) => {
                if begin.role() != Some(Role::Responder) {
                    warn!("request {} asks for role {}; serving as responder", request_id, begin.role);
                }
                pending.role = begin.role;
                pending.keep_connection = begin.keep_connection;
            }
            FastcgiRecordBody::AbortRequest => {
                info!("request {} aborted by the web server", request_id);
                self.pending = None;
                return Ok(AssemblerEvent::Aborted { request_id });
            }
            FastcgiRecordBody::Params(ref content) if content.is_empty() => {
                debug!("done reading params for request {}", request_id);
                pending.params_done = true;
            }
            FastcgiRecordBody::Params(content) => {
                append_limited(&mut pending.params_buf, &content, "PARAMS", max_params)?;
            }
            FastcgiRecordBody::Stdin(ref content) if content.is_empty() => {
                debug!("done reading stdin for request {}", request_id);
                pending.stdin_done = true;
            }
            FastcgiRecordBody::Stdin(content) => {
                append_limited(&mut pending.body, &content, "STDIN", max_stdin)?;
            }
            FastcgiRecordBody::Data(_) => {
                // This is only used by the "Filter" role.
                warn!("FCGI_DATA not supported; dropping record for request {}", request_id);
            }
            other => {
                error!("unexpected record {:?} for request {}", other, request_id);
                return Err(FastcgiError::UnexpectedRecordType(other.record_type()));
            }
        }

        if !pending.is_complete() {
            return Ok(AssemblerEvent::Incomplete);
        }

        let mut params = ParameterSet::new();
        if let Err(e) = read_params(&pending.params_buf, &mut params) {
            error!("request {}: bad PARAMS stream: {}", request_id, e);
            self.pending = None;
            return Err(e);
        }
        pending.params_buf.clear();
        Ok(AssemblerEvent::Complete(FastcgiRequest {
            request_id: pending.request_id,
            role: pending.role,
            keep_connection: pending.keep_connection,
            params,
            body: pending.body.split().freeze(),
        }))
    }
}

fn append_limited(buf: &mut BytesMut, content: &Bytes, stream: &'static str, limit: usize) -> Result<()> {
    if buf.len() + content.len() > limit {
        error!("{} exceeds size limit ({} bytes)", stream, limit);
        return Err(FastcgiError::TooLarge { stream, limit });
    }
    buf.extend_from_slice(content);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lowlevel::BeginRequest;
    use crate::namevalue::write_param;

    fn record(request_id: u16, body: FastcgiRecordBody) -> FastcgiRecord {
        FastcgiRecord { request_id, body }
    }

    fn begin(request_id: u16) -> FastcgiRecord {
        record(
            request_id,
            FastcgiRecordBody::BeginRequest(BeginRequest {
                role: Role::Responder as u16,
                keep_connection: true,
            }),
        )
    }

    fn params(request_id: u16, pairs: &[(&str, &str)]) -> FastcgiRecord {
        let mut buf = BytesMut::new();
        for &(name, value) in pairs {
            write_param(&mut buf, name.as_bytes(), value.as_bytes()).unwrap();
        }
        record(request_id, FastcgiRecordBody::Params(buf.freeze()))
    }

    fn stdin(request_id: u16, data: &'static [u8]) -> FastcgiRecord {
        record(request_id, FastcgiRecordBody::Stdin(Bytes::from_static(data)))
    }

    fn assembler() -> RequestAssembler {
        RequestAssembler::new(&ServerConfig::default())
    }

    fn expect_incomplete(event: AssemblerEvent) {
        match event {
            AssemblerEvent::Incomplete => (),
            other => panic!("expected Incomplete, got {:?}", other),
        }
    }

    fn expect_complete(event: AssemblerEvent) -> FastcgiRequest {
        match event {
            AssemblerEvent::Complete(request) => request,
            other => panic!("expected Complete, got {:?}", other),
        }
    }

    #[test]
    fn assembles_basic_request() {
        let mut asm = assembler();
        assert_eq!(asm.state(), AssemblerState::Empty);
        expect_incomplete(asm.feed(begin(1)).unwrap());
        assert_eq!(asm.state(), AssemblerState::AccumulatingParams);
        expect_incomplete(asm.feed(params(1, &[("SCRIPT_FILENAME", "/tmp/a.php")])).unwrap());
        expect_incomplete(asm.feed(params(1, &[])).unwrap());
        assert_eq!(asm.state(), AssemblerState::AccumulatingBody);
        expect_incomplete(asm.feed(stdin(1, b"a=1")).unwrap());
        let request = expect_complete(asm.feed(stdin(1, b"")).unwrap());

        assert_eq!(request.request_id, 1);
        assert_eq!(request.params.len(), 1);
        assert_eq!(request.param("SCRIPT_FILENAME"), Some("/tmp/a.php"));
        assert_eq!(request.body, Bytes::from_static(b"a=1"));
        assert_eq!(asm.state(), AssemblerState::Complete);
        assert_eq!(asm.current_id(), Some(1));

        asm.reset();
        assert_eq!(asm.state(), AssemblerState::Empty);
        assert_eq!(asm.current_id(), None);
    }

    #[test]
    fn stdin_is_appended() {
        let mut asm = assembler();
        asm.feed(begin(1)).unwrap();
        asm.feed(params(1, &[])).unwrap();
        asm.feed(stdin(1, b"a=1")).unwrap();
        asm.feed(stdin(1, b"&b=2")).unwrap();
        let request = expect_complete(asm.feed(stdin(1, b"")).unwrap());
        assert_eq!(request.body, Bytes::from_static(b"a=1&b=2"));
    }

    #[test]
    fn streams_terminate_in_any_order() {
        let mut asm = assembler();
        asm.feed(begin(3)).unwrap();
        asm.feed(stdin(3, b"body")).unwrap();
        expect_incomplete(asm.feed(stdin(3, b"")).unwrap());
        expect_incomplete(asm.feed(params(3, &[("A", "1")])).unwrap());
        let request = expect_complete(asm.feed(params(3, &[])).unwrap());
        assert_eq!(request.param("A"), Some("1"));
        assert_eq!(request.body, Bytes::from_static(b"body"));
    }

    #[test]
    fn later_params_overwrite_earlier() {
        let mut asm = assembler();
        asm.feed(params(1, &[("A", "1"), ("B", "2")])).unwrap();
        asm.feed(params(1, &[("A", "3")])).unwrap();
        asm.feed(params(1, &[])).unwrap();
        let request = expect_complete(asm.feed(stdin(1, b"")).unwrap());
        assert_eq!(request.param("A"), Some("3"));
        assert_eq!(request.param("B"), Some("2"));
    }

    #[test]
    fn pair_split_across_records() {
        let mut whole = BytesMut::new();
        write_param(&mut whole, b"QUERY_STRING", b"x=1").unwrap();
        let whole = whole.freeze();
        let mut asm = assembler();
        asm.feed(record(1, FastcgiRecordBody::Params(whole.slice(..5)))).unwrap();
        asm.feed(record(1, FastcgiRecordBody::Params(whole.slice(5..)))).unwrap();
        asm.feed(params(1, &[])).unwrap();
        let request = expect_complete(asm.feed(stdin(1, b"")).unwrap());
        assert_eq!(request.param("QUERY_STRING"), Some("x=1"));
    }

    #[test]
    fn other_ids_do_not_disturb_pending() {
        let mut asm = assembler();
        asm.feed(begin(1)).unwrap();
        asm.feed(params(1, &[("A", "1")])).unwrap();
        match asm.feed(params(2, &[("A", "evil")])).unwrap() {
            AssemblerEvent::Ignored { request_id: 2 } => (),
            other => panic!("unexpected {:?}", other),
        }
        match asm.feed(begin(2)).unwrap() {
            AssemblerEvent::Busy { request_id: 2 } => (),
            other => panic!("unexpected {:?}", other),
        }
        asm.feed(stdin(2, b"")).unwrap();
        asm.feed(params(2, &[])).unwrap();
        assert_eq!(asm.current_id(), Some(1));
        assert_eq!(asm.state(), AssemblerState::AccumulatingParams);

        asm.feed(params(1, &[])).unwrap();
        let request = expect_complete(asm.feed(stdin(1, b"")).unwrap());
        assert_eq!(request.param("A"), Some("1"));
        assert!(request.body.is_empty());
    }

    #[test]
    fn next_id_after_completion() {
        let mut asm = assembler();
        asm.feed(params(1, &[])).unwrap();
        expect_complete(asm.feed(stdin(1, b"")).unwrap());
        asm.reset();
        expect_incomplete(asm.feed(begin(7)).unwrap());
        assert_eq!(asm.current_id(), Some(7));
    }

    #[test]
    fn unreset_complete_request_is_replaced() {
        let mut asm = assembler();
        asm.feed(params(1, &[("A", "1")])).unwrap();
        expect_complete(asm.feed(stdin(1, b"")).unwrap());
        expect_incomplete(asm.feed(params(2, &[])).unwrap());
        assert_eq!(asm.current_id(), Some(2));
        let request = expect_complete(asm.feed(stdin(2, b"")).unwrap());
        assert!(request.params.is_empty());
    }

    #[test]
    fn abort_discards_pending() {
        let mut asm = assembler();
        asm.feed(begin(5)).unwrap();
        asm.feed(stdin(5, b"partial")).unwrap();
        match asm.feed(record(5, FastcgiRecordBody::AbortRequest)).unwrap() {
            AssemblerEvent::Aborted { request_id: 5 } => (),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!asm.is_pending());
    }

    #[test]
    fn begin_records_role_and_flags() {
        let mut asm = assembler();
        asm.feed(record(
            4,
            FastcgiRecordBody::BeginRequest(BeginRequest {
                role: Role::Authorizer as u16,
                keep_connection: false,
            }),
        ))
        .unwrap();
        asm.feed(params(4, &[])).unwrap();
        let request = expect_complete(asm.feed(stdin(4, b"")).unwrap());
        assert_eq!(request.role(), Some(Role::Authorizer));
        assert!(!request.keep_connection);
    }

    #[test]
    fn stdin_limit_is_enforced() {
        let mut config = ServerConfig::default();
        config.max_stdin_bytes = 4;
        let mut asm = RequestAssembler::new(&config);
        asm.feed(stdin(1, b"abc")).unwrap();
        assert!(matches!(
            asm.feed(stdin(1, b"de")),
            Err(FastcgiError::TooLarge { stream: "STDIN", limit: 4 })
        ));
    }

    #[test]
    fn params_limit_is_enforced() {
        let config = ServerConfig::new().max_params_bytes(6);
        let mut asm = RequestAssembler::new(&config);
        expect_incomplete(asm.feed(params(1, &[("A", "1")])).unwrap());
        assert!(matches!(
            asm.feed(params(1, &[("B", "2")])),
            Err(FastcgiError::TooLarge { stream: "PARAMS", limit: 6 })
        ));
    }

    #[test]
    fn truncated_params_fail_at_completion() {
        let mut asm = assembler();
        asm.feed(record(1, FastcgiRecordBody::Params(Bytes::from_static(&[1, 10, b'K'])))).unwrap();
        asm.feed(params(1, &[])).unwrap();
        assert!(matches!(
            asm.feed(stdin(1, b"")),
            Err(FastcgiError::TruncatedNameValue { offset: 0 })
        ));
        assert_eq!(asm.state(), AssemblerState::Empty);
    }
}
