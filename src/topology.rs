// lossweep: TLS Handshake Latency under Emulated and Real Network Impairment
// Copyright (C) 2025 The lossweep authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Emulated two-host topology: a client and a server network namespace, joined by a veth pair.
//!
//! Requires root privileges and `ip netns` support.

use std::{process::Command, sync::Arc, time::Duration};

use crate::{
    error::{SweepError, SweepResult},
    exec::{run_checked, run_tolerated, LocalHost, NamespaceHost},
};

pub const CLIENT_IP: &str = "10.0.0.2";
pub const SERVER_IP: &str = "10.0.0.1";
const PREFIX_LEN: u8 = 24;
/// Interface names are limited to 15 characters, and the longest suffix is `-c-eth0`.
pub const MAX_PREFIX_LEN: usize = 15 - "-c-eth0".len();

/// Interface names `{prefix}-c-eth0` and `{prefix}-s-eth0` of the client and server side.
fn interface_names(prefix: &str) -> SweepResult<(String, String)> {
    if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN {
        return Err(SweepError::Config(format!(
            "namespace prefix {prefix:?} must have 1 to {MAX_PREFIX_LEN} characters"
        )));
    }
    Ok((format!("{prefix}-c-eth0"), format!("{prefix}-s-eth0")))
}

/// Both namespaces and their interfaces. Dropping the link deletes both namespaces, which also
/// removes the veth pair.
pub struct EmulatedLink {
    pub client: Arc<NamespaceHost>,
    pub server: Arc<NamespaceHost>,
    pub client_iface: String,
    pub server_iface: String,
}

impl EmulatedLink {
    /// Create namespaces `{prefix}-client` and `{prefix}-server` with interfaces
    /// `{prefix}-c-eth0` and `{prefix}-s-eth0`. Leftovers of a previous run are removed first.
    pub async fn create(prefix: &str, deadline: Duration) -> SweepResult<Self> {
        let (client_iface, server_iface) = interface_names(prefix)?;
        let root = LocalHost::new("root");
        let client = format!("{prefix}-client");
        let server = format!("{prefix}-server");

        for ns in [&client, &server] {
            run_tolerated(&root, "ip", &["netns", "del", ns.as_str()], deadline).await;
            run_checked(&root, "ip", &["netns", "add", ns.as_str()], deadline).await?;
        }
        let link = Self {
            client: Arc::new(NamespaceHost::new(client)),
            server: Arc::new(NamespaceHost::new(server)),
            client_iface,
            server_iface,
        };

        run_checked(
            &root,
            "ip",
            &[
                "link",
                "add",
                link.client_iface.as_str(),
                "netns",
                link.client.namespace(),
                "type",
                "veth",
                "peer",
                "name",
                link.server_iface.as_str(),
                "netns",
                link.server.namespace(),
            ],
            deadline,
        )
        .await?;

        for (host, iface, ip) in [
            (&link.client, &link.client_iface, CLIENT_IP),
            (&link.server, &link.server_iface, SERVER_IP),
        ] {
            let cidr = format!("{ip}/{PREFIX_LEN}");
            let host = host.as_ref();
            run_checked(host, "ip", &["link", "set", "lo", "up"], deadline).await?;
            run_checked(host, "ip", &["addr", "add", cidr.as_str(), "dev", iface.as_str()], deadline)
                .await?;
            run_checked(host, "ip", &["link", "set", iface.as_str(), "up"], deadline).await?;
        }
        log::info!(
            "Created emulated link {}({CLIENT_IP}) <-> {}({SERVER_IP})",
            link.client.namespace(),
            link.server.namespace()
        );
        Ok(link)
    }
}

impl Drop for EmulatedLink {
    fn drop(&mut self) {
        for ns in [self.client.namespace(), self.server.namespace()] {
            match Command::new("ip").args(["netns", "del", ns]).output() {
                Ok(o) if o.status.success() => log::debug!("Deleted namespace {ns}"),
                Ok(o) => log::warn!(
                    "Cannot delete namespace {ns}: {}",
                    String::from_utf8_lossy(&o.stderr).trim()
                ),
                Err(e) => log::warn!("Cannot delete namespace {ns}: {e}"),
            }
        }
    }
}
