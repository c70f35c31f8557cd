use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use slotmux::poll::{self, ReadySlot, Registry, PRIMARY_SLOT};
use slotmux::MuxError;
use tracing::{info, trace, warn};

use crate::error::ServerError;

/// Per-read buffer; larger client payloads are echoed across multiple
/// poll cycles.
pub const ECHO_BUF_SIZE: usize = 4096;

/// Default registry capacity, listener slot included.
pub const DEFAULT_CAPACITY: usize = 128;

/// The poll-multiplexed echo server: one listener, up to `capacity - 1`
/// concurrent clients, one thread.
///
/// Accepted connections live in a slot-indexed table parallel to the
/// registry, which keeps the sockets open for exactly as long as their
/// slot is bound. Sockets stay in blocking mode; every read and accept is
/// preceded by a readiness report for that descriptor.
pub struct EchoServer {
    listener: TcpListener,
    registry: Registry,
    conns: Vec<Option<TcpStream>>,
    ready: Vec<ReadySlot>,
}

impl EchoServer {
    pub fn bind(addr: impl ToSocketAddrs, capacity: usize) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).map_err(ServerError::Bind)?;
        let registry = Registry::new(&listener, capacity);
        Ok(EchoServer {
            listener,
            registry,
            conns: (0..capacity).map(|_| None).collect(),
            ready: Vec::with_capacity(capacity),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn client_count(&self) -> usize {
        self.conns.iter().filter(|c| c.is_some()).count()
    }

    /// Bound slots in index order, the order they are serviced in.
    pub fn client_slots(&self) -> Vec<usize> {
        self.conns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_some())
            .map(|(slot, _)| slot)
            .collect()
    }

    /// Runs poll cycles until a fatal error.
    pub fn run(mut self) -> Result<(), ServerError> {
        loop {
            self.poll_once()?;
        }
    }

    /// One poll cycle: block until readiness, then service every reported
    /// slot, listener first, clients in ascending slot order. Returns the
    /// number of slots serviced.
    pub fn poll_once(&mut self) -> Result<usize, ServerError> {
        let count = self.registry.wait(&mut self.ready)?;
        if count == 0 {
            return Err(ServerError::NoReady);
        }
        let serviced = self.ready.len();
        for i in 0..serviced {
            let ev = self.ready[i];
            if ev.slot == PRIMARY_SLOT {
                self.accept_one()?;
            } else {
                self.service_client(ev)?;
            }
        }
        Ok(serviced)
    }

    /// Accepts exactly one pending connection; the listener gets one slot
    /// and one readiness bit per cycle, so there is no drain loop. When
    /// the registry is full the connection is dropped and the server keeps
    /// running.
    fn accept_one(&mut self) -> Result<(), ServerError> {
        let (stream, peer) = self.listener.accept().map_err(ServerError::Accept)?;
        match self.registry.allocate(&stream, poll::READ) {
            Ok(slot) => {
                info!(%peer, slot, "accepted connection");
                self.conns[slot] = Some(stream);
            }
            Err(MuxError::RegistryFull { capacity }) => {
                warn!(%peer, capacity, "registry full, rejecting connection");
                drop(stream);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn service_client(&mut self, ev: ReadySlot) -> Result<(), ServerError> {
        let slot = ev.slot;
        if !ev.is_any(poll::READ | poll::ERROR | poll::HANGUP) {
            // POLLNVAL or a stray event we never asked for; the slot is dead
            self.disconnect(slot, "unusable descriptor");
            return Ok(());
        }
        let stream = match self.conns[slot].as_mut() {
            Some(stream) => stream,
            None => return Ok(()),
        };
        let mut buf = [0u8; ECHO_BUF_SIZE];
        match stream.read(&mut buf) {
            Ok(0) => self.disconnect(slot, "peer closed"),
            Ok(n) => {
                let wrote = stream
                    .write(&buf[..n])
                    .map_err(|source| ServerError::Write { slot, source })?;
                if wrote != n {
                    return Err(ServerError::ShortWrite {
                        slot,
                        wrote,
                        expected: n,
                    });
                }
                trace!(slot, bytes = n, "echoed");
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                self.disconnect(slot, "peer reset")
            }
            Err(source) => return Err(ServerError::Read { slot, source }),
        }
        Ok(())
    }

    /// Normal disconnect path: free the slot, drop (and thereby close)
    /// the socket.
    fn disconnect(&mut self, slot: usize, reason: &str) {
        self.registry.release(slot);
        if self.conns[slot].take().is_some() {
            info!(slot, reason, "closing connection");
        }
    }
}
