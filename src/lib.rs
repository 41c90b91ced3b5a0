//! A FastCGI responder on tokio.
//!
//! The low level decodes and encodes records ([`FastcgiLowlevelCodec`]) and
//! the name-value lists of the PARAMS stream. The high level assembles
//! complete requests, hands them to a [`FastcgiRequestHandler`] and frames the
//! response ([`FastcgiService`]).

#[macro_use] extern crate enum_primitive;
#[macro_use] extern crate log;

mod config;
mod error;
mod hi;
mod lowlevel;
mod namevalue;
mod s11n;

pub use config::ServerConfig;
pub use error::{FastcgiError, Result};
pub use hi::assembler::{AssemblerEvent, AssemblerState, RequestAssembler};
pub use hi::cgi::CgiHandler;
pub use hi::handler::{FastcgiRequest, FastcgiRequestHandler};
pub use hi::response::{end_request, stream_records, FastcgiResponse, ResponseFrame};
pub use hi::service::{serve_connection, FastcgiService};
pub use lowlevel::{
    decode_header, encode_header, padding_len, read_body, write_record, BeginRequest, EndRequest,
    FastcgiLowlevelCodec, FastcgiRecord, FastcgiRecordBody,
};
pub use namevalue::{decode_params, encode_params, read_params, write_param, ParameterSet};
pub use s11n::{
    BeginRequestBody, EndRequestBody, ProtocolStatus, RecordHeader, RecordType, Role,
    FASTCGI_VERSION, FCGI_KEEP_CONN, HEADER_LEN, MAX_CONTENT_LEN,
};
