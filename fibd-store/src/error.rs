//
// Copyright (c) The Fibd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::error;

// Persistent store errors.
#[derive(Debug)]
pub enum Error {
    DiskWriteError(std::io::Error),
    DiskReadError(std::io::Error),
    ParseError(serde_json::Error),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::DiskWriteError(error)
            | Error::DiskReadError(error) => {
                error!(%error, "{}", self);
            }
            Error::ParseError(error) => {
                error!(%error, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::DiskWriteError(..) => {
                write!(f, "failed to write database snapshot to disk")
            }
            Error::DiskReadError(..) => {
                write!(f, "failed to read database snapshot from disk")
            }
            Error::ParseError(..) => {
                write!(f, "failed to decode database snapshot")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::DiskWriteError(error) | Error::DiskReadError(error) => {
                Some(error)
            }
            Error::ParseError(error) => Some(error),
        }
    }
}
