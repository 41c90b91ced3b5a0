use std::time::Duration;

/// Per-connection settings for [`FastcgiService`](crate::FastcgiService).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Deadline for each record read. When it expires between requests the
    /// connection is closed quietly; in the middle of a request it is a
    /// `Timeout` error. `None` waits forever.
    pub read_timeout: Option<Duration>,

    /// Deadline for one handler invocation. An expired deadline is reported to
    /// the web server like a handler failure.
    pub handler_timeout: Option<Duration>,

    /// Maximum accumulated PARAMS bytes per request.
    pub max_params_bytes: usize,

    /// Maximum accumulated STDIN bytes per request.
    pub max_stdin_bytes: usize,
}

impl ServerConfig {
    pub const DEFAULT_MAX_PARAMS_BYTES: usize = 1024 * 1024;
    pub const DEFAULT_MAX_STDIN_BYTES: usize = 32 * 1024 * 1024;

    pub fn new() -> ServerConfig {
        ServerConfig {
            read_timeout: None,
            handler_timeout: None,
            max_params_bytes: Self::DEFAULT_MAX_PARAMS_BYTES,
            max_stdin_bytes: Self::DEFAULT_MAX_STDIN_BYTES,
        }
    }

    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> ServerConfig {
        self.read_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn handler_timeout(mut self, timeout: Duration) -> ServerConfig {
        self.handler_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn max_params_bytes(mut self, limit: usize) -> ServerConfig {
        self.max_params_bytes = limit;
        self
    }

    #[must_use]
    pub fn max_stdin_bytes(mut self, limit: usize) -> ServerConfig {
        self.max_stdin_bytes = limit;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.read_timeout, None);
        assert_eq!(config.handler_timeout, None);
        assert_eq!(config.max_params_bytes, 1_048_576);
        assert_eq!(config.max_stdin_bytes, 33_554_432);
    }

    #[test]
    fn builder_setters() {
        let config = ServerConfig::new()
            .read_timeout(Duration::from_secs(30))
            .handler_timeout(Duration::from_secs(5))
            .max_stdin_bytes(10);
        assert_eq!(config.read_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.handler_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.max_stdin_bytes, 10);
        assert_eq!(config.max_params_bytes, ServerConfig::DEFAULT_MAX_PARAMS_BYTES);
    }
}
