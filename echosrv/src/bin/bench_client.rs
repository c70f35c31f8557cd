//! Load generator for the echo server: N threads of blocking
//! write-then-read round trips, latency recorded per round trip.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use hdrhistogram::Histogram;
use rand::Rng;

struct Stats {
    requests: u64,
    responses: u64,
    hist: Histogram<u64>,
}

impl Stats {
    fn new() -> Self {
        Stats {
            requests: 0,
            responses: 0,
            // latency in micros, up to 30 seconds
            hist: Histogram::new_with_max(30 * 1_000_000, 2).unwrap(),
        }
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    nthreads: u8,
    msg_size: usize,
    host_port: String,

    /// Run duration in seconds.
    #[clap(long, default_value_t = 10)]
    secs: u64,
}

fn main() {
    let args = Args::parse();
    let stop = Arc::new(AtomicBool::new(false));
    let (send, receive) = mpsc::channel();

    for _ in 0..args.nthreads {
        let stop = stop.clone();
        let stats_send = send.clone();
        let address = args.host_port.clone();
        let msg_size = args.msg_size;
        thread::spawn(move || {
            let mut stream = match TcpStream::connect(&address) {
                Ok(stream) => stream,
                Err(e) => {
                    eprintln!("connect to {address} failed: {e}");
                    process::exit(1);
                }
            };
            let data = rand_bytes(msg_size);
            let mut in_buf = vec![0u8; msg_size];
            let mut stats = Stats::new();

            while !stop.load(Ordering::Relaxed) {
                let start = Instant::now();

                if stream.write_all(&data).is_err() {
                    eprintln!("write error");
                    break;
                }
                stats.requests += 1;

                // the server echoes in buffer-sized chunks; read_exact
                // reassembles the full message
                match stream.read_exact(&mut in_buf) {
                    Ok(()) => stats.responses += 1,
                    Err(e) => {
                        eprintln!("read error: {e}");
                        break;
                    }
                }

                let latency_micros = start.elapsed().as_micros() as u64;
                if stats.hist.record(latency_micros).is_err() {
                    eprintln!("latency {latency_micros}us out of histogram range");
                    break;
                }
            }
            let _ = stats_send.send(stats);
        });
    }

    thread::sleep(Duration::from_secs(args.secs));
    stop.store(true, Ordering::Relaxed);

    let mut all_stats = Stats::new();
    for _ in 0..args.nthreads {
        let thread_stats = match receive.recv() {
            Ok(stats) => stats,
            Err(_) => break,
        };
        all_stats.requests += thread_stats.requests;
        all_stats.responses += thread_stats.responses;
        let _ = all_stats.hist.add(thread_stats.hist);
    }

    print_stats(args.secs, &all_stats);
}

fn print_stats(run_time_secs: u64, stats: &Stats) {
    println!(
        "Throughput: {} request/sec, {} response/sec",
        stats.requests / run_time_secs,
        stats.responses / run_time_secs
    );
    println!("Requests: {}", stats.requests);
    println!("Responses: {}", stats.responses);
    let hist = &stats.hist;
    println!(
        "latency in micros min={}, mean={:.1}, 50th={}, 90th={}, 99th={}, max={}",
        hist.min(),
        hist.mean(),
        hist.value_at_quantile(0.5),
        hist.value_at_quantile(0.9),
        hist.value_at_quantile(0.99),
        hist.max()
    );
}

fn rand_bytes(n: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..n).map(|_| rng.gen::<u8>()).collect()
}
