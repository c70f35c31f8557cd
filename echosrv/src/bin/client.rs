//! Interactive echo client: the same readiness multiplexing as the
//! server, over exactly two descriptors (the socket and stdin).

use std::error::Error;
use std::io::{self, Read, Write};
use std::net::TcpStream;

use clap::Parser;
use echosrv::DEFAULT_PORT;
use slotmux::poll::{self, Registry, PRIMARY_SLOT};

const LINE_BUF_SIZE: usize = 4096;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Server host name or address.
    host: String,

    #[clap(long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let mut socket = TcpStream::connect((args.host.as_str(), args.port))
        .map_err(|e| format!("connect to {}:{} failed: {e}", args.host, args.port))?;

    // socket in the permanent primary slot, stdin in the one client slot
    let stdin = io::stdin();
    let mut registry = Registry::new(&socket, 2);
    let stdin_slot = registry.allocate(&stdin, poll::READ)?;

    let mut ready = Vec::with_capacity(2);
    let mut buf = [0u8; LINE_BUF_SIZE];
    loop {
        registry.wait(&mut ready)?;
        for ev in &ready {
            if ev.slot == PRIMARY_SLOT {
                let n = socket
                    .read(&mut buf)
                    .map_err(|e| format!("read from server failed: {e}"))?;
                if n == 0 {
                    println!("server terminated");
                    return Ok(());
                }
                println!("{}", String::from_utf8_lossy(&buf[..n]));
            } else if ev.slot == stdin_slot {
                let n = stdin
                    .lock()
                    .read(&mut buf)
                    .map_err(|e| format!("read from stdin failed: {e}"))?;
                if n == 0 {
                    return Ok(());
                }
                let line = match buf[..n].strip_suffix(b"\n") {
                    Some(stripped) => stripped,
                    None => &buf[..n],
                };
                if line.is_empty() {
                    continue;
                }
                socket
                    .write_all(line)
                    .map_err(|e| format!("write to server failed: {e}"))?;
            }
        }
    }
}
