//
// Copyright (c) The Fibd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::{error, warn};

// FIB agent errors.
#[derive(Debug)]
pub enum Error {
    // I/O errors
    IoError(IoError),
    // Platform agent rejected a request.
    AgentRejected(u8),
    // Publication received from an unexpected node.
    UnknownNodeName(String),
}

// FIB agent I/O errors.
#[derive(Debug)]
pub enum IoError {
    TcpConnectError(std::io::Error),
    TcpSendError(std::io::Error),
    TcpRecvError(std::io::Error),
    AgentTimeout,
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::IoError(error) => {
                error.log();
            }
            Error::AgentRejected(status) => {
                error!(%status, "{}", self);
            }
            Error::UnknownNodeName(node_name) => {
                error!(%node_name, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => error.fmt(f),
            Error::AgentRejected(..) => {
                write!(f, "request rejected by the platform agent")
            }
            Error::UnknownNodeName(..) => {
                write!(f, "received publication from unknown node")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(error) => Some(error),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

// ===== impl IoError =====

impl IoError {
    pub(crate) fn log(&self) {
        match self {
            IoError::TcpConnectError(error)
            | IoError::TcpSendError(error)
            | IoError::TcpRecvError(error) => {
                warn!(%error, "{}", self);
            }
            IoError::AgentTimeout => {
                warn!("{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::TcpConnectError(..) => {
                write!(f, "failed to connect to the platform agent")
            }
            IoError::TcpSendError(..) => {
                write!(f, "failed to send request to the platform agent")
            }
            IoError::TcpRecvError(..) => {
                write!(f, "failed to read reply from the platform agent")
            }
            IoError::AgentTimeout => {
                write!(f, "platform agent request timed out")
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::TcpConnectError(error)
            | IoError::TcpSendError(error)
            | IoError::TcpRecvError(error) => Some(error),
            IoError::AgentTimeout => None,
        }
    }
}
