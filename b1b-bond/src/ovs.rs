//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

use b1b_utils::mac_addr::MacAddr;

use crate::error::{Error, OvsError};
use crate::fdb::{Destination, DestinationSet};

const OVS_RUN_DIR: &str = "/run/openvswitch";
pub(crate) const OVS_PID_FILE: &str = "/run/openvswitch/ovs-vswitchd.pid";

// Scratch buffer bound, matching the kernel channel's maximum message
// size. A JSON-RPC response that does not fit is a fatal error.
const RECV_BUFFER_SIZE: usize = 32768;

// JSON-RPC 1.0 client for the ovs-vswitchd control socket. The socket is
// opened lazily, so purely Linux-bridge deployments never touch the OVS
// run directory. The control socket path is derived once per process from
// the pid of the daemon's pid-file lock holder.
#[derive(Debug)]
pub(crate) struct OvsClient {
    stream: Option<UnixStream>,
    path: Option<PathBuf>,
    reqid: u64,
    buf: Vec<u8>,
}

// Both the `result` and `error` members must be present; a reply missing
// the `error` member entirely is malformed, unlike one carrying an
// explicit null.
#[derive(Debug, Deserialize)]
struct Response {
    id: u64,
    result: Option<String>,
    error: serde_json::Value,
}

// ===== impl OvsClient =====

impl OvsClient {
    pub(crate) fn new() -> OvsClient {
        OvsClient {
            stream: None,
            path: None,
            reqid: 0,
            buf: Vec::with_capacity(RECV_BUFFER_SIZE),
        }
    }

    // Resolves the OVS bridge and OpenFlow port number of a bond, given
    // the bond's kernel interface name, from `dpif/show` output.
    pub(crate) async fn bridge_for_port(
        &mut self,
        ifname: &str,
    ) -> Result<(String, u32), Error> {
        let reply = self.rpc("dpif/show", None).await?;
        parse_dpif_show(&reply, ifname)
            .ok_or_else(|| Error::OvsPortNotFound(ifname.to_owned()))
    }

    // Collects the learned (VLAN, MAC) pairs of an OVS bridge from
    // `fdb/show` output, excluding the bond's own port.
    pub(crate) async fn read_fdb(
        &mut self,
        brname: &str,
        ofport: u32,
    ) -> Result<DestinationSet, Error> {
        let reply = self.rpc("fdb/show", Some(brname)).await?;
        Ok(parse_fdb_show(&reply, ofport)?)
    }

    async fn rpc(
        &mut self,
        method: &str,
        param: Option<&str>,
    ) -> Result<String, OvsError> {
        self.reqid += 1;
        let reqid = self.reqid;
        let params: Vec<&str> = param.into_iter().collect();
        let request = json!({ "id": reqid, "method": method, "params": params });
        debug!(%method, ?param, "OVS request");

        self.connect().await?;
        let OvsClient { stream, buf, .. } = self;
        let Some(stream) = stream.as_mut() else {
            return Err(OvsError::Disconnected);
        };

        stream
            .write_all(request.to_string().as_bytes())
            .await
            .map_err(OvsError::Send)?;

        // Accumulate reads until the response parses as a complete JSON
        // value or overflows the scratch buffer.
        buf.clear();
        let mut chunk = [0u8; 4096];
        let response: Response = loop {
            let n = stream.read(&mut chunk).await.map_err(OvsError::Recv)?;
            if n == 0 {
                return Err(OvsError::Disconnected);
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.len() >= RECV_BUFFER_SIZE {
                return Err(OvsError::ResponseTooLarge(buf.len()));
            }

            match serde_json::from_slice(buf) {
                Ok(response) => break response,
                Err(error) if error.is_eof() => (),
                Err(error) => return Err(OvsError::ParseResponse(error)),
            }
        };

        if response.id != reqid {
            return Err(OvsError::IdMismatch(reqid, response.id));
        }
        match response.error {
            serde_json::Value::Null => (),
            serde_json::Value::String(error) => {
                return Err(OvsError::ErrorResponse(error));
            }
            error => return Err(OvsError::ErrorResponse(error.to_string())),
        }
        let mut result = response.result.ok_or(OvsError::MissingResult)?;
        if result.ends_with('\n') {
            result.pop();
        }
        Ok(result)
    }

    async fn connect(&mut self) -> Result<(), OvsError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let path = self.control_path()?;
        let stream = UnixStream::connect(&path)
            .await
            .map_err(|error| OvsError::Connect(path, error))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn control_path(&mut self) -> Result<PathBuf, OvsError> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }

        let pid = locked_pid()?;
        let path = PathBuf::from(format!(
            "{}/ovs-vswitchd.{}.ctl",
            OVS_RUN_DIR, pid
        ));
        self.path = Some(path.clone());
        Ok(path)
    }
}

// ===== helper functions =====

// ovs-vswitchd holds a write lock on its pid file; the lock owner is
// authoritative even when the file contents are stale.
fn locked_pid() -> Result<libc::pid_t, OvsError> {
    let file =
        std::fs::File::open(OVS_PID_FILE).map_err(OvsError::PidFileOpen)?;

    let mut lck: libc::flock = unsafe { std::mem::zeroed() };
    lck.l_type = libc::F_WRLCK as libc::c_short;
    lck.l_whence = libc::SEEK_SET as libc::c_short;
    let ret =
        unsafe { libc::fcntl(file.as_raw_fd(), libc::F_GETLK, &mut lck) };
    if ret < 0 {
        return Err(OvsError::PidFileLock(std::io::Error::last_os_error()));
    }
    if lck.l_type == libc::F_UNLCK as libc::c_short {
        return Err(OvsError::PidFileNotLocked);
    }

    Ok(lck.l_pid)
}

// `dpif/show` lists datapaths, their bridges, and per-bridge port lines.
// A line whose first token carries no following number names a datapath
// or bridge; a "<name> <ofport>/<odp-port>: ..." line names a port of the
// most recently seen bridge. The first port line matching the bond's
// kernel interface name wins.
fn parse_dpif_show(reply: &str, ifname: &str) -> Option<(String, u32)> {
    let mut bridge: Option<&str> = None;

    for line in reply.lines() {
        let mut fields = line.split_whitespace();
        let Some(first) = fields.next() else {
            continue;
        };
        let name = first.split(':').next().unwrap_or(first);

        match fields.next().and_then(leading_u32) {
            Some(ofport) => {
                if name == ifname {
                    return bridge.map(|bridge| (bridge.to_owned(), ofport));
                }
            }
            None => bridge = Some(name),
        }
    }

    None
}

// `fdb/show` output is a header line followed by one
// "<ofport> <vlan> <mac> <age>" entry per line. `LOCAL` entries and
// entries on the bond's own port are not upstream-reachable endpoints.
fn parse_fdb_show(
    reply: &str,
    ofport: u32,
) -> Result<DestinationSet, OvsError> {
    let mut destinations = DestinationSet::default();

    for line in reply.lines().skip(1) {
        if line.trim().is_empty() {
            continue;
        }

        let malformed = || OvsError::MalformedReply(line.to_owned());
        let mut fields = line.split_whitespace();

        let port = fields.next().ok_or_else(malformed)?;
        if port == "LOCAL" {
            continue;
        }
        let port: u32 = port.parse().map_err(|_| malformed())?;

        let vlan: u16 = fields
            .next()
            .and_then(|vlan| vlan.parse().ok())
            .ok_or_else(malformed)?;
        let mac: MacAddr = fields
            .next()
            .and_then(|mac| mac.parse().ok())
            .ok_or_else(malformed)?;

        if port != ofport {
            destinations.insert(Destination::new(vlan, mac));
        }
    }

    Ok(destinations)
}

fn leading_u32(token: &str) -> Option<u32> {
    let end = token
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(token.len());
    token[..end].parse().ok()
}

// ===== unit tests =====
