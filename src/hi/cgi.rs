//! A handler that runs an external program per request, CGI style.
//!
//! Request parameters become the child's environment through `Command::envs`;
//! the responder's own environment is never modified, so concurrent requests
//! on other connections cannot see each other's variables.

use crate::error::FastcgiError;
use crate::hi::handler::{FastcgiRequest, FastcgiRequestHandler};
use crate::hi::response::FastcgiResponse;

use futures::future::{BoxFuture, FutureExt};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

#[derive(Debug, Clone)]
pub struct CgiHandler {
    program: PathBuf,
    args: Vec<OsString>,
    script_param: Option<String>,
    body_arg_prefix: Option<String>,
    env_passthrough: Vec<String>,
    cgi_output: bool,
}

impl CgiHandler {
    pub fn new<P: Into<PathBuf>>(program: P) -> CgiHandler {
        CgiHandler {
            program: program.into(),
            args: Vec::new(),
            script_param: None,
            body_arg_prefix: None,
            env_passthrough: vec!["PATH".to_owned()],
            cgi_output: false,
        }
    }

    /// Runs `php <SCRIPT_FILENAME> --post=<body>` for every request.
    pub fn php<P: Into<PathBuf>>(interpreter: P) -> CgiHandler {
        CgiHandler::new(interpreter)
            .script_param("SCRIPT_FILENAME")
            .body_arg_prefix("--post=")
    }

    #[must_use]
    pub fn arg<S: Into<OsString>>(mut self, arg: S) -> CgiHandler {
        self.args.push(arg.into());
        self
    }

    /// Appends the value of this request parameter as the last fixed argument.
    /// Requests without the parameter fail.
    #[must_use]
    pub fn script_param<S: Into<String>>(mut self, name: S) -> CgiHandler {
        self.script_param = Some(name.into());
        self
    }

    /// Also passes the request body as an argument, prefixed with `prefix`.
    #[must_use]
    pub fn body_arg_prefix<S: Into<String>>(mut self, prefix: S) -> CgiHandler {
        self.body_arg_prefix = Some(prefix.into());
        self
    }

    /// Host environment variables copied into the child's environment.
    #[must_use]
    pub fn env_passthrough<I, S>(mut self, vars: I) -> CgiHandler
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env_passthrough = vars.into_iter().map(Into::into).collect();
        self
    }

    /// Treats stdout as complete CGI output (headers included) instead of a bare body.
    #[must_use]
    pub fn cgi_output(mut self, enabled: bool) -> CgiHandler {
        self.cgi_output = enabled;
        self
    }

    fn command(&self, request: &FastcgiRequest) -> Result<Command, FastcgiError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        if let Some(ref name) = self.script_param {
            match request.param(name) {
                Some(script) => {
                    cmd.arg(script);
                }
                None => {
                    return Err(FastcgiError::handler_failure(1, format!("{} not set", name)));
                }
            }
        }
        if let Some(ref prefix) = self.body_arg_prefix {
            cmd.arg(format!("{}{}", prefix, String::from_utf8_lossy(&request.body)));
        }

        cmd.env_clear();
        for var in &self.env_passthrough {
            if let Some(value) = std::env::var_os(var) {
                cmd.env(var, value);
            }
        }
        cmd.envs(&request.params)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }

    async fn run(&self, request: FastcgiRequest) -> Result<FastcgiResponse, FastcgiError> {
        let mut cmd = self.command(&request)?;
        let mut child = cmd.spawn().map_err(|e| {
            FastcgiError::handler_failure(1, format!("failed to spawn {}: {}", self.program.display(), e))
        })?;

        let stdin = child.stdin.take();
        let body = request.body;
        let feed_stdin = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&body).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), io::Error>(())
        };

        let (fed, output) = tokio::join!(feed_stdin, child.wait_with_output());
        let output = output.map_err(|e| {
            FastcgiError::handler_failure(1, format!("waiting for {}: {}", self.program.display(), e))
        })?;
        if let Err(e) = fed {
            // The program is free to ignore its input.
            debug!("request {}: stdin not fully consumed: {}", request.request_id, e);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let app_status = output.status.code().map_or(1, |code| code as u32);
            return Err(FastcgiError::handler_failure(app_status, stderr.trim_end()));
        }
        if !stderr.is_empty() {
            warn!("request {}: {}", request.request_id, stderr.trim_end());
        }

        Ok(if self.cgi_output {
            FastcgiResponse::raw(output.stdout)
        } else {
            FastcgiResponse::with_body(output.stdout)
        })
    }
}

impl FastcgiRequestHandler for CgiHandler {
    fn call(&self, request: FastcgiRequest) -> BoxFuture<'_, Result<FastcgiResponse, FastcgiError>> {
        self.run(request).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn request(params: &[(&str, &str)], body: &'static [u8]) -> FastcgiRequest {
        FastcgiRequest {
            request_id: 1,
            role: 1,
            keep_connection: true,
            params: params
                .iter()
                .map(|&(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
            body: Bytes::from_static(body),
        }
    }

    #[test]
    fn missing_script_param_fails() {
        let handler = CgiHandler::php("php");
        match handler.command(&request(&[], b"")) {
            Err(FastcgiError::HandlerFailure { app_status: 1, .. }) => (),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn php_preset_arguments() {
        let handler = CgiHandler::php("php");
        let cmd = handler
            .command(&request(&[("SCRIPT_FILENAME", "/tmp/a.php")], b"a=1"))
            .unwrap();
        let args: Vec<_> = cmd.as_std().get_args().collect();
        assert_eq!(args, ["/tmp/a.php", "--post=a=1"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn params_reach_child_environment() {
        let handler = CgiHandler::new("/bin/sh")
            .arg("-c")
            .arg("printf '%s|' \"$SCRIPT_FILENAME\"; cat");
        let response = handler
            .call(request(&[("SCRIPT_FILENAME", "/tmp/a.php")], b"a=1"))
            .await
            .unwrap();
        assert_eq!(response.body, b"/tmp/a.php|a=1".to_vec());
        assert!(std::env::var_os("SCRIPT_FILENAME").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_handler_failure() {
        let handler = CgiHandler::new("/bin/sh").arg("-c").arg("echo oops >&2; exit 3");
        match handler.call(request(&[], b"")).await {
            Err(FastcgiError::HandlerFailure { app_status: 3, reason }) => assert_eq!(reason, "oops"),
            other => panic!("unexpected {:?}", other.map(|r| r.body)),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cgi_output_passes_headers_through() {
        let handler = CgiHandler::new("/bin/sh")
            .arg("-c")
            .arg("printf 'Status: 201\\r\\n\\r\\nmade'")
            .cgi_output(true);
        let response = handler.call(request(&[], b"")).await.unwrap();
        assert_eq!(response.into_bytes(), Bytes::from_static(b"Status: 201\r\n\r\nmade"));
    }

    #[tokio::test]
    async fn spawn_failure_is_handler_failure() {
        let handler = CgiHandler::new("/definitely/not/a/program");
        assert!(matches!(
            handler.call(request(&[], b"")).await,
            Err(FastcgiError::HandlerFailure { app_status: 1, .. })
        ));
    }
}
