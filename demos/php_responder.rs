//! Serves PHP scripts over FastCGI: every request runs
//! `php <SCRIPT_FILENAME> --post=<body>` and returns its output as text/html.
//!
//! Point a web server at it, e.g. for nginx:
//! `fastcgi_pass 127.0.0.1:9001; fastcgi_param SCRIPT_FILENAME $document_root$fastcgi_script_name;`

use tokio_fastcgi_responder::{CgiHandler, FastcgiService, ServerConfig};

use clap::Parser;
use log::{error, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "php_responder", about = "FastCGI responder that runs PHP scripts")]
struct Cli {
    /// TCP "host:port", or a Unix socket path prefixed with "unix://".
    #[arg(short, long, default_value = "127.0.0.1:9001")]
    listen: String,

    /// PHP CLI interpreter to run for each request.
    #[arg(long, default_value = "php")]
    php: PathBuf,

    /// Seconds a script may run before the request fails.
    #[arg(long)]
    handler_timeout: Option<u64>,

    /// Seconds to wait for each record before dropping the connection.
    #[arg(long)]
    read_timeout: Option<u64>,
}

fn spawn_connection<IO>(service: FastcgiService<CgiHandler>, socket: IO, peer: String)
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        info!("new connection from {}", peer);
        match service.serve(socket).await {
            Ok(()) => info!("connection from {} closed", peer),
            Err(e) => warn!("connection from {} failed: {}", peer, e),
        }
    });
}

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = ServerConfig::new();
    if let Some(secs) = cli.handler_timeout {
        config = config.handler_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = cli.read_timeout {
        config = config.read_timeout(Duration::from_secs(secs));
    }
    let service = FastcgiService::with_config(Arc::new(CgiHandler::php(&cli.php)), config);

    if let Some(path) = cli.listen.strip_prefix("unix://") {
        #[cfg(unix)]
        {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    error!("failed to remove existing socket file {:?}: {}", path, e);
                    return Err(e);
                }
            }
            let listener = tokio::net::UnixListener::bind(path)?;
            info!("listening on unix socket {}", path);
            loop {
                let (socket, _addr) = listener.accept().await?;
                spawn_connection(service.clone(), socket, path.to_owned());
            }
        }
        #[cfg(not(unix))]
        {
            let _ = path;
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "Unix sockets are not supported on this platform",
            ));
        }
    }

    let listener = TcpListener::bind(&cli.listen).await?;
    info!("listening on {}", cli.listen);
    loop {
        let (socket, peer) = listener.accept().await?;
        spawn_connection(service.clone(), socket, peer.to_string());
    }
}
