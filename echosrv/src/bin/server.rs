use std::error::Error as _;
use std::process;

use clap::Parser;
use echosrv::server::DEFAULT_CAPACITY;
use echosrv::EchoServer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on, bound on all local interfaces.
    port: u16,

    /// Registry capacity: maximum concurrent connections plus the
    /// listener's reserved slot. Fixed for the process lifetime.
    #[clap(long, default_value_t = DEFAULT_CAPACITY)]
    max_clients: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let server = match EchoServer::bind(("0.0.0.0", args.port), args.max_clients) {
        Ok(server) => server,
        Err(e) => fatal(e),
    };
    info!(port = args.port, capacity = args.max_clients, "listening");

    // run() only returns on a fatal condition
    if let Err(e) = server.run() {
        fatal(e);
    }
}

fn fatal(e: echosrv::ServerError) -> ! {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    error!("{msg}");
    process::exit(1);
}
