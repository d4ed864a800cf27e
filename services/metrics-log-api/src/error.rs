use std::io;
use std::net::{AddrParseError, SocketAddr};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid listen address: {0}")]
    Address(#[from] AddrParseError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("server terminated: {0}")]
    Serve(#[source] io::Error),
}
