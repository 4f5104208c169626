//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::path::PathBuf;

use tracing::error;

use crate::ovs::OVS_PID_FILE;

// Fatal daemon errors. Every variant terminates the process with exit
// code 1 after being logged.
#[derive(Debug)]
pub enum Error {
    ChannelOpen(std::io::Error),
    ArpSocket(std::io::Error),
    SignalSetup(std::io::Error),
    LinkRequest(String, rtnetlink::Error),
    LinkNotFound(String),
    LinkNameMismatch(String, String),
    MasterRequest(String, rtnetlink::Error),
    InvalidBond(String, CheckError),
    DetectFailed(rtnetlink::Error),
    NoBonds,
    FdbDump(String, rtnetlink::Error),
    Ovs(OvsError),
    OvsPortNotFound(String),
    OvsBridgeLink(String, rtnetlink::Error),
    OvsBridgeIndex(String),
    MonitorClosed,
}

// Reasons an interface fails bond validation. These are fatal for
// interfaces named on the command line and demote auto-detected
// candidates to a debug-logged skip.
#[derive(Debug)]
pub enum CheckError {
    KindNotSet,
    NotABond,
    ModeNotSet,
    InvalidMode(u8),
    MasterNotSet,
    MasterNameNotSet,
    MasterKindNotSet(String),
    MasterNotABridge(String),
}

// Errors talking JSON-RPC to ovs-vswitchd.
#[derive(Debug)]
pub enum OvsError {
    PidFileOpen(std::io::Error),
    PidFileLock(std::io::Error),
    PidFileNotLocked,
    Connect(PathBuf, std::io::Error),
    Send(std::io::Error),
    Recv(std::io::Error),
    Disconnected,
    ResponseTooLarge(usize),
    ParseResponse(serde_json::Error),
    IdMismatch(u64, u64),
    MissingResult,
    ErrorResponse(String),
    MalformedReply(String),
}

// ===== impl Error =====

impl Error {
    pub fn log(&self) {
        match self {
            Error::ChannelOpen(error)
            | Error::ArpSocket(error)
            | Error::SignalSetup(error) => {
                error!(%error, "{}", self);
            }
            Error::LinkRequest(_, error)
            | Error::MasterRequest(_, error)
            | Error::DetectFailed(error)
            | Error::FdbDump(_, error)
            | Error::OvsBridgeLink(_, error) => {
                error!(%error, "{}", self);
            }
            Error::Ovs(error) => error.log(),
            _ => error!("{}", self),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ChannelOpen(..) => {
                write!(f, "Failed to open netlink channel")
            }
            Error::ArpSocket(..) => {
                write!(f, "Failed to create ARP socket")
            }
            Error::SignalSetup(..) => {
                write!(f, "Failed to install signal handler")
            }
            Error::LinkRequest(ifname, ..) | Error::LinkNotFound(ifname) => {
                write!(f, "Failed to get interface info: {}", ifname)
            }
            Error::LinkNameMismatch(expected, actual) => {
                write!(
                    f,
                    "Got interface info with wrong name: {}: {}",
                    expected, actual
                )
            }
            Error::MasterRequest(ifname, ..) => {
                write!(f, "Failed to get master info for bond: {}", ifname)
            }
            Error::InvalidBond(ifname, check) => {
                write!(f, "{}: {}", check, ifname)
            }
            Error::DetectFailed(..) => {
                write!(f, "Error while auto-detecting bonds")
            }
            Error::NoBonds => {
                write!(f, "No usable bonds detected")
            }
            Error::FdbDump(brname, ..) => {
                write!(f, "Failed to get forwarding table for bridge: {}", brname)
            }
            Error::Ovs(error) => std::fmt::Display::fmt(error, f),
            Error::OvsPortNotFound(ifname) => {
                write!(f, "Failed to identify OVS bridge and port: {}", ifname)
            }
            Error::OvsBridgeLink(brname, ..) => {
                write!(f, "Failed to get OVS bridge info: {}", brname)
            }
            Error::OvsBridgeIndex(brname) => {
                write!(f, "Failed to get OVS bridge index: {}", brname)
            }
            Error::MonitorClosed => {
                write!(f, "Netlink event channel closed")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ChannelOpen(error)
            | Error::ArpSocket(error)
            | Error::SignalSetup(error) => Some(error),
            Error::LinkRequest(_, error)
            | Error::MasterRequest(_, error)
            | Error::DetectFailed(error)
            | Error::FdbDump(_, error)
            | Error::OvsBridgeLink(_, error) => Some(error),
            Error::Ovs(error) => Some(error),
            _ => None,
        }
    }
}

impl From<OvsError> for Error {
    fn from(error: OvsError) -> Error {
        Error::Ovs(error)
    }
}

// ===== impl CheckError =====

impl std::fmt::Display for CheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckError::KindNotSet => {
                write!(f, "Interface type not set")
            }
            CheckError::NotABond => {
                write!(f, "Invalid interface type")
            }
            CheckError::ModeNotSet => {
                write!(f, "Interface bonding mode not set")
            }
            CheckError::InvalidMode(mode) => {
                write!(f, "Invalid bonding mode ({})", mode)
            }
            CheckError::MasterNotSet => {
                write!(f, "Interface master not set")
            }
            CheckError::MasterNameNotSet => {
                write!(f, "Failed to get master name for bond")
            }
            CheckError::MasterKindNotSet(brname) => {
                write!(f, "Bond master ({}) type not set", brname)
            }
            CheckError::MasterNotABridge(brname) => {
                write!(f, "Bond master ({}) not a Linux or OVS bridge", brname)
            }
        }
    }
}

impl std::error::Error for CheckError {}

// ===== impl OvsError =====

impl OvsError {
    pub(crate) fn log(&self) {
        match self {
            OvsError::PidFileOpen(error)
            | OvsError::PidFileLock(error)
            | OvsError::Send(error)
            | OvsError::Recv(error) => {
                error!(%error, "{}", self);
            }
            OvsError::Connect(_, error) => {
                error!(%error, "{}", self);
            }
            OvsError::ParseResponse(error) => {
                error!(%error, "{}", self);
            }
            _ => error!("{}", self),
        }
    }
}

impl std::fmt::Display for OvsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OvsError::PidFileOpen(..) => {
                write!(f, "Failed to open PID file: {}", OVS_PID_FILE)
            }
            OvsError::PidFileLock(..) => {
                write!(f, "Failed to query PID file lock: {}", OVS_PID_FILE)
            }
            OvsError::PidFileNotLocked => {
                write!(f, "PID file not locked: {}", OVS_PID_FILE)
            }
            OvsError::Connect(path, ..) => {
                write!(f, "Failed to connect UNIX socket: {}", path.display())
            }
            OvsError::Send(..) => {
                write!(f, "Failed to send JSON-RPC request")
            }
            OvsError::Recv(..) => {
                write!(f, "Failed to receive JSON-RPC response")
            }
            OvsError::Disconnected => {
                write!(f, "OVS daemon closed the control socket")
            }
            OvsError::ResponseTooLarge(len) => {
                write!(f, "JSON-RPC response too large: {}", len)
            }
            OvsError::ParseResponse(..) => {
                write!(f, "Failed to parse JSON-RPC response")
            }
            OvsError::IdMismatch(request, response) => {
                write!(
                    f,
                    "JSON-RPC response ID does not match request: \
                     request: {}, response: {}",
                    request, response
                )
            }
            OvsError::MissingResult => {
                write!(f, "JSON-RPC response has no result")
            }
            OvsError::ErrorResponse(error) => {
                write!(f, "Error response from OVS daemon: {}", error)
            }
            OvsError::MalformedReply(line) => {
                write!(f, "Failed to parse result from OVS daemon: {}", line)
            }
        }
    }
}

impl std::error::Error for OvsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OvsError::PidFileOpen(error)
            | OvsError::PidFileLock(error)
            | OvsError::Connect(_, error)
            | OvsError::Send(error)
            | OvsError::Recv(error) => Some(error),
            OvsError::ParseResponse(error) => Some(error),
            _ => None,
        }
    }
}
