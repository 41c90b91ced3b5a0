use crate::config::ServerConfig;
use crate::error::{FastcgiError, Result};
use crate::hi::assembler::{AssemblerEvent, RequestAssembler};
use crate::hi::handler::{FastcgiRequest, FastcgiRequestHandler};
use crate::hi::response::{end_request, ResponseFrame};
use crate::lowlevel::{FastcgiLowlevelCodec, FastcgiRecord, FastcgiRecordBody};
use crate::s11n::ProtocolStatus;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_util::codec::Framed;

use std::sync::Arc;

/// Serves FastCGI connections with one handler.
///
/// Each call to [`serve`](FastcgiService::serve) drives one connection and
/// shares nothing mutable with other calls, so an accept loop can run one per
/// connection on separate tasks. Requests on a connection are served one at a
/// time; multiplexed request ids are not supported.
pub struct FastcgiService<H: FastcgiRequestHandler + 'static> {
    handler: Arc<H>,
    config: ServerConfig,
}

impl<H: FastcgiRequestHandler + 'static> Clone for FastcgiService<H> {
    fn clone(&self) -> Self {
        FastcgiService {
            handler: Arc::clone(&self.handler),
            config: self.config.clone(),
        }
    }
}

impl<H: FastcgiRequestHandler + 'static> FastcgiService<H> {
    pub fn new(handler: Arc<H>) -> FastcgiService<H> {
        FastcgiService::with_config(handler, ServerConfig::default())
    }

    pub fn with_config(handler: Arc<H>, config: ServerConfig) -> FastcgiService<H> {
        FastcgiService { handler, config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Runs the record loop until the web server closes the connection, a
    /// request without FCGI_KEEP_CONN has been answered, or a protocol error
    /// occurs. Errors end this connection only.
    pub async fn serve<IO>(&self, io: IO) -> Result<()>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(io, FastcgiLowlevelCodec);
        let mut assembler = RequestAssembler::new(&self.config);

        loop {
            let next = match self.next_record(&mut framed, &assembler).await {
                Ok(next) => next,
                Err(e) => return Err(fail_pending(&mut framed, &assembler, e).await),
            };
            let record = match next {
                Some(record) => record,
                None => {
                    if let Some(id) = assembler.current_id() {
                        warn!("connection closed with request {} incomplete", id);
                    } else {
                        debug!("connection closed");
                    }
                    return Ok(());
                }
            };

            if record.request_id == 0 {
                reply_management(&mut framed, &record).await?;
                continue;
            }

            if let FastcgiRecordBody::UnknownType(typ, _) = record.body {
                error!("unknown record type {} for request {}", typ, record.request_id);
                return Err(FastcgiError::UnknownRecordType(typ));
            }

            match assembler.feed(record)? {
                AssemblerEvent::Incomplete | AssemblerEvent::Ignored { .. } => (),
                AssemblerEvent::Busy { request_id } => {
                    let reply = end_request(request_id, 0, ProtocolStatus::CantMultiplexConnections);
                    send_records(&mut framed, vec![reply]).await?;
                }
                AssemblerEvent::Aborted { request_id } => {
                    let reply = end_request(request_id, 0, ProtocolStatus::RequestComplete);
                    send_records(&mut framed, vec![reply]).await?;
                }
                AssemblerEvent::Complete(request) => {
                    let keep_connection = request.keep_connection;
                    let records = self.respond(request).await;
                    send_records(&mut framed, records).await?;
                    assembler.reset();
                    if !keep_connection {
                        debug!("FCGI_KEEP_CONN not set; closing connection");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn next_record<IO>(
        &self,
        framed: &mut Framed<IO, FastcgiLowlevelCodec>,
        assembler: &RequestAssembler,
    ) -> Result<Option<FastcgiRecord>>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let deadline = match self.config.read_timeout {
            Some(deadline) => deadline,
            None => return framed.next().await.transpose(),
        };
        match timeout(deadline, framed.next()).await {
            Ok(item) => item.transpose(),
            Err(_) => match assembler.current_id() {
                Some(id) => {
                    error!("request {}: no record within {:?}", id, deadline);
                    Err(FastcgiError::Timeout(deadline))
                }
                None => {
                    debug!("connection idle for {:?}; closing", deadline);
                    Ok(None)
                }
            },
        }
    }

    /// Runs the handler and turns its outcome into the records to send.
    async fn respond(&self, request: FastcgiRequest) -> Vec<FastcgiRecord> {
        let request_id = request.request_id;
        info!(
            "request {}: {} {}",
            request_id,
            request.param("REQUEST_METHOD").unwrap_or("<no REQUEST_METHOD set!>"),
            request
                .param("SCRIPT_FILENAME")
                .or_else(|| request.param("REQUEST_URI"))
                .unwrap_or("<no SCRIPT_FILENAME set!>")
        );

        let call = self.handler.call(request);
        let result = match self.config.handler_timeout {
            Some(deadline) => timeout(deadline, call)
                .await
                .unwrap_or_else(|_| Err(FastcgiError::Timeout(deadline))),
            None => call.await,
        };

        match result {
            Ok(response) => ResponseFrame::new(request_id, response.into_bytes()).into_records(),
            Err(e) => {
                let app_status = e.app_status();
                warn!("request {} failed with status {}: {}", request_id, app_status, e);
                ResponseFrame::failure_records(request_id, app_status, &e.to_string())
            }
        }
    }
}

/// Tells the web server that the pending request failed when `err` only
/// concerns that request, then hands `err` back.
async fn fail_pending<IO>(
    framed: &mut Framed<IO, FastcgiLowlevelCodec>,
    assembler: &RequestAssembler,
    err: FastcgiError,
) -> FastcgiError
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    if let (Some(id), true) = (assembler.current_id(), err.is_request_scoped()) {
        let records = ResponseFrame::failure_records(id, err.app_status(), &err.to_string());
        if let Err(e) = send_records(framed, records).await {
            warn!("request {}: could not report failure: {}", id, e);
        }
    }
    err
}

/// Answers a management record (request id 0). Capability negotiation is not
/// implemented, so every management record gets UNKNOWN_TYPE.
async fn reply_management<IO>(
    framed: &mut Framed<IO, FastcgiLowlevelCodec>,
    record: &FastcgiRecord,
) -> Result<()>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let typ = record.body.record_type();
    debug!("management record type {}; replying UNKNOWN_TYPE", typ);
    let reply = FastcgiRecord {
        request_id: 0,
        body: FastcgiRecordBody::UnknownTypeResponse(typ),
    };
    send_records(framed, vec![reply]).await
}

async fn send_records<IO>(
    framed: &mut Framed<IO, FastcgiLowlevelCodec>,
    records: Vec<FastcgiRecord>,
) -> Result<()>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    for record in records {
        framed.feed(record).await?;
    }
    SinkExt::<FastcgiRecord>::flush(framed).await
}

/// Serves one connection with `handler` and `config`.
pub async fn serve_connection<IO, H>(io: IO, handler: Arc<H>, config: ServerConfig) -> Result<()>
where
    IO: AsyncRead + AsyncWrite + Unpin,
    H: FastcgiRequestHandler + 'static,
{
    FastcgiService::with_config(handler, config).serve(io).await
}
