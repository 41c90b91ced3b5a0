use crate::error::FastcgiError;
use crate::hi::response::FastcgiResponse;
use crate::namevalue::ParameterSet;
use crate::s11n::Role;

use bytes::Bytes;
use enum_primitive::FromPrimitive;
use futures::future::{BoxFuture, FutureExt};

use std::future::Future;

/// A fully assembled request: both the PARAMS and STDIN streams have ended.
#[derive(Debug, Clone)]
pub struct FastcgiRequest {
    pub request_id: u16,
    /// Raw role code from BEGIN_REQUEST.
    pub role: u16,
    pub keep_connection: bool,
    pub params: ParameterSet,
    pub body: Bytes,
}

impl FastcgiRequest {
    pub fn role(&self) -> Option<Role> {
        Role::from_u16(self.role)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Produces the response for one request.
///
/// The connection loop awaits the returned future before it reads the next
/// record. An `Err` is reported to the web server as END_REQUEST with a
/// non-zero appStatus (see `FastcgiError::app_status`) and the connection
/// stays open.
pub trait FastcgiRequestHandler: Send + Sync {
    fn call(&self, request: FastcgiRequest) -> BoxFuture<'_, Result<FastcgiResponse, FastcgiError>>;
}

impl<F, Fut> FastcgiRequestHandler for F
where
    F: Fn(FastcgiRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<FastcgiResponse, FastcgiError>> + Send + 'static,
{
    fn call(&self, request: FastcgiRequest) -> BoxFuture<'_, Result<FastcgiResponse, FastcgiError>> {
        (self)(request).boxed()
    }
}
