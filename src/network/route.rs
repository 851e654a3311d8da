//! Host routes for sandboxes behind a macvlan master.
//!
//! Traffic from the host to a macvlan child never passes the parent
//! device, so every sandbox IP gets a host exact route through the master
//! with the master's own address as gateway.

use std::net::{IpAddr, Ipv4Addr};

use ipnet::Ipv4Net;
use log::{debug, info, warn};

use crate::{
    error::{ErrorWrap, PluginError, PluginResult},
    ipam::store::StoreEntry,
};

use super::{
    constants,
    netlink::Socket,
    netlink_route::{self, HostRoute, LinkID, NetlinkRoute},
};

/// The master link as seen by the kernel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MasterLink {
    pub name: String,
    pub index: u32,
    /// kernel link kind, empty for devices without link info
    pub kind: String,
}

impl MasterLink {
    pub fn is_macvlan(&self) -> bool {
        self.kind == constants::LINK_KIND_MACVLAN
    }
}

/// Kernel access needed to reconcile sandbox routes.
pub trait HostNetwork {
    /// Resolve the master by name, [`PluginError::LinkNotFound`] when missing.
    fn master_link(&mut self, name: &str) -> PluginResult<MasterLink>;

    /// Install or replace the /32 route to `ip` via the master's address.
    fn create_route(&mut self, master: &MasterLink, ip: Ipv4Addr) -> PluginResult<()>;

    /// Remove the /32 route to `ip`, a missing route is not an error.
    fn delete_route(&mut self, master: &MasterLink, ip: Ipv4Addr) -> PluginResult<()>;

    fn has_route(&mut self, master: &MasterLink, ip: Ipv4Addr) -> PluginResult<bool>;
}

/// Returns true when the kernel told us the route to delete does not exist.
/// Depending on the kernel version this is ESRCH or ENOENT.
pub fn is_route_not_found(err: &PluginError) -> bool {
    match err.unwrap() {
        PluginError::Netlink(e) => {
            let code = -e.raw_code();
            code == libc::ESRCH || code == libc::ENOENT
        }
        PluginError::Io(e) => {
            e.kind() == std::io::ErrorKind::NotFound || e.raw_os_error() == Some(libc::ESRCH)
        }
        _ => false,
    }
}

/// Returns true when the route to create is already there.
pub fn is_route_exists(err: &PluginError) -> bool {
    match err.unwrap() {
        PluginError::Netlink(e) => -e.raw_code() == libc::EEXIST,
        PluginError::Io(e) => e.kind() == std::io::ErrorKind::AlreadyExists,
        _ => false,
    }
}

fn host_route(ip: Ipv4Addr, gw: Option<Ipv4Addr>, master: &MasterLink) -> PluginResult<HostRoute> {
    Ok(HostRoute {
        dest: Ipv4Net::new(ip, 32)?,
        gw,
        oif: master.index,
    })
}

/// [`HostNetwork`] backed by a rtnetlink socket.
pub struct NetlinkHost {
    sock: Socket<NetlinkRoute>,
}

impl NetlinkHost {
    pub fn new() -> PluginResult<NetlinkHost> {
        Ok(NetlinkHost {
            sock: Socket::new().wrap("open netlink socket")?,
        })
    }

    /// First IPv4 address on the master, additional addresses are ignored.
    fn gateway(&mut self, master: &MasterLink) -> PluginResult<Option<Ipv4Addr>> {
        let addresses = self.sock.dump_addresses(Some(master.index))?;
        let ips = netlink_route::ipv4_addresses(&addresses);
        if ips.len() > 1 {
            debug!(
                "master {} has {} IPv4 addresses, using {} as gateway",
                master.name,
                ips.len(),
                ips[0]
            );
        }
        Ok(ips.first().copied())
    }
}

impl HostNetwork for NetlinkHost {
    fn master_link(&mut self, name: &str) -> PluginResult<MasterLink> {
        let link = self.sock.get_link(LinkID::Name(name.to_string()))?;
        Ok(MasterLink {
            name: name.to_string(),
            index: link.header.index,
            kind: netlink_route::link_kind(&link),
        })
    }

    fn create_route(&mut self, master: &MasterLink, ip: Ipv4Addr) -> PluginResult<()> {
        let gw = self.gateway(master)?.ok_or_else(|| {
            PluginError::msg(format!(
                "master {} has no IPv4 address to route {ip} through",
                master.name
            ))
        })?;
        let route = host_route(ip, Some(gw), master)?;
        match self.sock.replace_route(&route) {
            Err(err) if is_route_exists(&err) => {
                debug!("route {route} already exists");
                Ok(())
            }
            res => res,
        }
    }

    fn delete_route(&mut self, master: &MasterLink, ip: Ipv4Addr) -> PluginResult<()> {
        // without an address the route was already flushed together with it
        let gw = self.gateway(master)?;
        let route = host_route(ip, gw, master)?;
        match self.sock.del_route(&route) {
            Err(err) if is_route_not_found(&err) => {
                debug!("route {route} does not exist");
                Ok(())
            }
            res => res,
        }
    }

    fn has_route(&mut self, master: &MasterLink, ip: Ipv4Addr) -> PluginResult<bool> {
        let gw = self.gateway(master)?;
        let route = host_route(ip, gw, master)?;
        let routes = self.sock.dump_routes()?;
        Ok(routes.iter().any(|r| netlink_route::route_matches(r, &route)))
    }
}

/// What we know about a container on one network before acting on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContainerState {
    /// no entry, first ADD or DEL after a failed ADD
    Unseen,
    /// entry stored, no host route belongs to it
    Allocated(StoreEntry),
    /// entry stored and its IPv4 address is routed through a macvlan master
    AllocatedWithRoute(StoreEntry),
}

impl ContainerState {
    /// Build the state from the stored entry and the master link kind.
    pub fn inspect(entry: Option<StoreEntry>, master: Option<&MasterLink>) -> ContainerState {
        let state = match entry {
            None => ContainerState::Unseen,
            Some(entry) => {
                let routed = master.map_or(false, |m| m.is_macvlan()) && entry.ip.is_ipv4();
                if routed {
                    ContainerState::AllocatedWithRoute(entry)
                } else {
                    ContainerState::Allocated(entry)
                }
            }
        };
        debug!("container state: {state:?}");
        state
    }

    pub fn entry(&self) -> Option<&StoreEntry> {
        match self {
            ContainerState::Unseen => None,
            ContainerState::Allocated(entry) | ContainerState::AllocatedWithRoute(entry) => {
                Some(entry)
            }
        }
    }

    /// The IPv4 address whose host route has to be removed on change or DEL.
    pub fn routed_ip(&self) -> Option<Ipv4Addr> {
        match self {
            ContainerState::AllocatedWithRoute(StoreEntry {
                ip: IpAddr::V4(ip), ..
            }) => Some(*ip),
            _ => None,
        }
    }
}

/// Install the route for a freshly allocated address, only IPv4 is routed.
pub fn create_route<H: HostNetwork + ?Sized>(
    host: &mut H,
    master: &MasterLink,
    ip: IpAddr,
    container_id: &str,
) -> PluginResult<()> {
    match ip {
        IpAddr::V4(ip) => {
            info!("Creating route to {ip} via master {}", master.name);
            host.create_route(master, ip).wrap(format!(
                "create route to {ip} via {} for container {container_id}",
                master.name
            ))
        }
        IpAddr::V6(ip) => {
            warn!("IPv6 address {ip} is not routed via master {}", master.name);
            Ok(())
        }
    }
}

pub fn delete_route<H: HostNetwork + ?Sized>(
    host: &mut H,
    master: &MasterLink,
    ip: Ipv4Addr,
    container_id: &str,
) -> PluginResult<()> {
    info!("Deleting route to {ip} via master {}", master.name);
    host.delete_route(master, ip).wrap(format!(
        "delete route to {ip} via {} for container {container_id}",
        master.name
    ))
}
