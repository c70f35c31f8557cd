use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MuxError {
    /// Every slot is bound to a live descriptor; the caller decides whether
    /// this rejects the new descriptor or stops the process.
    #[error("descriptor registry full ({capacity} slots)")]
    RegistryFull { capacity: usize },

    /// The blocking readiness wait itself failed.
    #[error("poll wait failed")]
    Poll(#[source] io::Error),
}
