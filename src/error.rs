//! error types.
//!
//! Errors never cross a worker boundary: connection handlers log and close.
//! This type exists so startup code and the per-connection pipeline can
//! bubble failures to a single reporting point.

use std::{error, fmt, io};

use openssl::{error::ErrorStack, ssl};

pub enum Error {
    Io(io::Error),
    Tls(ssl::Error),
    Stack(ErrorStack),
    H2(::h2::Error),
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => fmt::Debug::fmt(e, f),
            Self::Tls(e) => fmt::Debug::fmt(e, f),
            Self::Stack(e) => fmt::Debug::fmt(e, f),
            Self::H2(e) => fmt::Debug::fmt(e, f),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => fmt::Display::fmt(e, f),
            Self::Tls(e) => fmt::Display::fmt(e, f),
            Self::Stack(e) => fmt::Display::fmt(e, f),
            Self::H2(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ssl::Error> for Error {
    fn from(e: ssl::Error) -> Self {
        Self::Tls(e)
    }
}

impl From<ErrorStack> for Error {
    fn from(e: ErrorStack) -> Self {
        Self::Stack(e)
    }
}

impl From<::h2::Error> for Error {
    fn from(e: ::h2::Error) -> Self {
        Self::H2(e)
    }
}
