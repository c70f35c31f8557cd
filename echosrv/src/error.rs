use std::io;

use slotmux::MuxError;
use thiserror::Error;

/// Fatal conditions for the server process. Peer disconnects (EOF or
/// connection reset) are not errors; they are handled in place by
/// releasing the slot.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind listener")]
    Bind(#[source] io::Error),

    #[error(transparent)]
    Mux(#[from] MuxError),

    /// An indefinite poll wait came back claiming nothing is ready.
    #[error("poll returned with no ready descriptors from an indefinite wait")]
    NoReady,

    #[error("accept failed on a ready listener")]
    Accept(#[source] io::Error),

    #[error("read failed on client slot {slot}")]
    Read {
        slot: usize,
        #[source]
        source: io::Error,
    },

    #[error("write failed on client slot {slot}")]
    Write {
        slot: usize,
        #[source]
        source: io::Error,
    },

    /// The echo write did not take the whole payload; there is no
    /// partial-write retry in this server.
    #[error("short write on client slot {slot}: wrote {wrote} of {expected} bytes")]
    ShortWrite {
        slot: usize,
        wrote: usize,
        expected: usize,
    },
}
