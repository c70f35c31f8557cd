use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use crate::error::MuxError;

pub type EventFlags = libc::c_short;
pub const READ: EventFlags = libc::POLLIN | libc::POLLPRI;
pub const WRITE: EventFlags = libc::POLLOUT;
pub const HANGUP: EventFlags = libc::POLLHUP;
pub const ERROR: EventFlags = libc::POLLERR;
pub const INVALID: EventFlags = libc::POLLNVAL;

/// Slot index of the primary descriptor, registered at construction and
/// never reclaimed.
pub const PRIMARY_SLOT: usize = 0;

/// Sentinel for a free slot; `poll(2)` ignores negative descriptors.
const UNUSED: RawFd = -1;

#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct PollFd {
    fd: RawFd,
    events: EventFlags,
    revents: EventFlags,
}

impl Default for PollFd {
    fn default() -> Self {
        PollFd {
            fd: UNUSED,
            events: 0,
            revents: 0,
        }
    }
}

/// One slot reported ready by [`Registry::wait`].
#[derive(Debug, Copy, Clone)]
pub struct ReadySlot {
    pub slot: usize,
    events: EventFlags,
}

impl ReadySlot {
    pub fn is_any(&self, flags: EventFlags) -> bool {
        flags & self.events != 0
    }

    pub fn is_read(&self) -> bool {
        (self.events & READ) != 0
    }

    pub fn events(&self) -> EventFlags {
        self.events
    }
}

/// Fixed-capacity descriptor table driven by `poll(2)`.
///
/// The table is `#[repr(C)]`-compatible with `libc::pollfd`, so the whole
/// thing is handed to the kernel without a translation pass. Slot 0 belongs
/// to the primary descriptor for the registry's lifetime; client slots are
/// allocated ascending from 1 and reclaimed on [`Registry::release`].
pub struct Registry {
    slots: Box<[PollFd]>,
}

impl Registry {
    /// Capacity counts the primary slot, so it must leave room for at least
    /// one other descriptor.
    pub fn new(primary: &impl AsRawFd, capacity: usize) -> Self {
        assert!(capacity >= 2, "registry capacity must be at least 2");
        let mut slots = vec![PollFd::default(); capacity].into_boxed_slice();
        slots[PRIMARY_SLOT] = PollFd {
            fd: primary.as_raw_fd(),
            events: READ,
            revents: 0,
        };
        Registry { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of bound slots, primary included.
    pub fn active(&self) -> usize {
        self.slots.iter().filter(|s| s.fd != UNUSED).count()
    }

    pub fn is_free(&self, slot: usize) -> bool {
        self.slots[slot].fd == UNUSED
    }

    /// Binds `f` to the lowest free slot. The registry never grows; when
    /// every slot is bound this fails with [`MuxError::RegistryFull`] and
    /// the caller picks the policy (reject the descriptor or give up).
    pub fn allocate(&mut self, f: &impl AsRawFd, events: EventFlags) -> Result<usize, MuxError> {
        for (slot, entry) in self.slots.iter_mut().enumerate().skip(1) {
            if entry.fd == UNUSED {
                *entry = PollFd {
                    fd: f.as_raw_fd(),
                    events,
                    revents: 0,
                };
                return Ok(slot);
            }
        }
        Err(MuxError::RegistryFull {
            capacity: self.slots.len(),
        })
    }

    /// Frees a slot. Idempotent; the primary slot is never reclaimed. The
    /// descriptor itself is closed by whoever owns the socket, not here.
    pub fn release(&mut self, slot: usize) {
        if slot == PRIMARY_SLOT {
            return;
        }
        self.slots[slot] = PollFd::default();
    }

    /// Blocks until at least one slot is ready, then fills `ready` with the
    /// slots to service in service order: the primary slot first if it is
    /// ready, then the rest ascending. The scan stops as soon as the
    /// kernel-reported ready count is consumed; slots past that point
    /// cannot be ready this cycle.
    ///
    /// Returns the kernel's ready count. The wait is indefinite, so a
    /// return of 0 means the poll mechanism broke its contract; it is
    /// passed through for the caller to treat as fatal.
    pub fn wait(&mut self, ready: &mut Vec<ReadySlot>) -> Result<usize, MuxError> {
        for entry in self.slots.iter_mut() {
            entry.revents = 0;
        }
        let rc = unsafe {
            libc::poll(
                self.slots.as_mut_ptr() as *mut libc::pollfd,
                self.slots.len() as libc::nfds_t,
                -1,
            )
        };
        if rc < 0 {
            return Err(MuxError::Poll(io::Error::last_os_error()));
        }
        let count = rc as usize;
        ready.clear();
        collect_ready(&self.slots, count, ready);
        Ok(count)
    }
}

/// Readiness scan with the early-exit optimization: stop once `ready_count`
/// slots with observed events have been collected. Output order is the
/// service order the table guarantees, slot 0 first, then ascending.
fn collect_ready(slots: &[PollFd], ready_count: usize, out: &mut Vec<ReadySlot>) {
    let mut remaining = ready_count;
    for (slot, entry) in slots.iter().enumerate() {
        if remaining == 0 {
            break;
        }
        if entry.fd == UNUSED || entry.revents == 0 {
            continue;
        }
        out.push(ReadySlot {
            slot,
            events: entry.revents,
        });
        remaining -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};

    fn bound_listener() -> TcpListener {
        TcpListener::bind("127.0.0.1:0").unwrap()
    }

    #[test]
    fn new_registry_holds_only_the_primary() {
        let listener = bound_listener();
        let registry = Registry::new(&listener, 8);
        assert_eq!(registry.capacity(), 8);
        assert_eq!(registry.active(), 1);
        assert!(!registry.is_free(PRIMARY_SLOT));
        for slot in 1..8 {
            assert!(registry.is_free(slot));
        }
    }

    #[test]
    fn allocate_fills_ascending_from_one() {
        let listener = bound_listener();
        let mut registry = Registry::new(&listener, 5);
        let a = bound_listener();
        let b = bound_listener();
        let c = bound_listener();
        assert_eq!(registry.allocate(&a, READ).unwrap(), 1);
        assert_eq!(registry.allocate(&b, READ).unwrap(), 2);
        assert_eq!(registry.allocate(&c, READ).unwrap(), 3);
        assert_eq!(registry.active(), 4);
    }

    #[test]
    fn allocate_fails_at_capacity() {
        let listener = bound_listener();
        let mut registry = Registry::new(&listener, 3);
        let a = bound_listener();
        let b = bound_listener();
        registry.allocate(&a, READ).unwrap();
        registry.allocate(&b, READ).unwrap();
        let c = bound_listener();
        match registry.allocate(&c, READ) {
            Err(MuxError::RegistryFull { capacity }) => assert_eq!(capacity, 3),
            other => panic!("expected RegistryFull, got {:?}", other.map(|_| ())),
        }
        // nothing past the capacity bound was touched
        assert_eq!(registry.active(), 3);
    }

    #[test]
    fn release_reclaims_the_lowest_slot_first() {
        let listener = bound_listener();
        let mut registry = Registry::new(&listener, 5);
        let a = bound_listener();
        let b = bound_listener();
        let c = bound_listener();
        registry.allocate(&a, READ).unwrap();
        registry.allocate(&b, READ).unwrap();
        registry.allocate(&c, READ).unwrap();

        registry.release(2);
        registry.release(2); // idempotent
        assert!(registry.is_free(2));
        assert_eq!(registry.active(), 3);

        let d = bound_listener();
        assert_eq!(registry.allocate(&d, READ).unwrap(), 2);
    }

    #[test]
    fn primary_slot_is_never_reclaimed() {
        let listener = bound_listener();
        let mut registry = Registry::new(&listener, 4);
        registry.release(PRIMARY_SLOT);
        assert!(!registry.is_free(PRIMARY_SLOT));
        assert_eq!(registry.active(), 1);
    }

    fn pfd(fd: RawFd, revents: EventFlags) -> PollFd {
        PollFd {
            fd,
            events: READ,
            revents,
        }
    }

    #[test]
    fn scan_yields_primary_first_then_ascending() {
        let slots = [pfd(3, READ), pfd(4, 0), pfd(5, READ), pfd(6, READ)];
        let mut out = Vec::new();
        collect_ready(&slots, 3, &mut out);
        let order: Vec<usize> = out.iter().map(|r| r.slot).collect();
        assert_eq!(order, vec![0, 2, 3]);
    }

    #[test]
    fn scan_stops_once_the_ready_count_is_consumed() {
        // slot 3 has stale-looking revents but the kernel said only two
        // slots are ready; the scan must not reach it
        let slots = [pfd(3, 0), pfd(4, READ), pfd(5, READ), pfd(6, READ)];
        let mut out = Vec::new();
        collect_ready(&slots, 2, &mut out);
        let order: Vec<usize> = out.iter().map(|r| r.slot).collect();
        assert_eq!(order, vec![1, 2]);
    }

    #[test]
    fn scan_skips_free_slots() {
        let slots = [pfd(3, READ), pfd(UNUSED, 0), pfd(5, HANGUP)];
        let mut out = Vec::new();
        collect_ready(&slots, 2, &mut out);
        let order: Vec<usize> = out.iter().map(|r| r.slot).collect();
        assert_eq!(order, vec![0, 2]);
        assert!(out[1].is_any(HANGUP));
        assert!(!out[1].is_read());
    }

    /// With an accurate ready count, the early-exit scan must produce
    /// exactly what a naive full-table scan produces.
    #[test]
    fn scan_early_exit_matches_naive_full_scan() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let len = rng.gen_range(2..32);
            let slots: Vec<PollFd> = (0..len)
                .map(|i| {
                    if rng.gen_bool(0.3) {
                        PollFd::default()
                    } else {
                        let revents = if rng.gen_bool(0.5) { READ } else { 0 };
                        pfd(3 + i as RawFd, revents)
                    }
                })
                .collect();
            let accurate_count = slots
                .iter()
                .filter(|s| s.fd != UNUSED && s.revents != 0)
                .count();

            let naive: Vec<usize> = slots
                .iter()
                .enumerate()
                .filter(|(_, s)| s.fd != UNUSED && s.revents != 0)
                .map(|(i, _)| i)
                .collect();

            let mut out = Vec::new();
            collect_ready(&slots, accurate_count, &mut out);
            let fast: Vec<usize> = out.iter().map(|r| r.slot).collect();
            assert_eq!(fast, naive);
        }
    }

    #[test]
    fn wait_reports_a_pending_accept_on_the_primary_slot() {
        let listener = bound_listener();
        let addr = listener.local_addr().unwrap();
        let mut registry = Registry::new(&listener, 4);
        let _client = TcpStream::connect(addr).unwrap();

        let mut ready = Vec::with_capacity(4);
        let count = registry.wait(&mut ready).unwrap();
        assert_eq!(count, 1);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].slot, PRIMARY_SLOT);
        assert!(ready[0].is_read());
    }

    #[test]
    fn wait_reports_readable_client_data() {
        let listener = bound_listener();
        let addr = listener.local_addr().unwrap();
        let mut registry = Registry::new(&listener, 4);

        let mut client = TcpStream::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        let slot = registry.allocate(&accepted, READ).unwrap();

        client.write_all(b"ping").unwrap();
        // the listener has nothing pending, so only the client slot shows up
        let mut ready = Vec::with_capacity(4);
        registry.wait(&mut ready).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].slot, slot);
        assert!(ready[0].is_read());
    }
}
