use std::net::{IpAddr, Ipv4Addr};

use crate::{
    error::{PluginError, PluginResult},
    network::netlink::{expect_netlink_result, NetlinkFamily, Socket},
};
use log::info;
use netlink_packet_core::{NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP, NLM_F_REPLACE};
use netlink_packet_route::{
    address::{AddressAttribute, AddressMessage},
    link::{InfoKind, LinkAttribute, LinkInfo, LinkMessage},
    route::{RouteAddress, RouteAttribute, RouteMessage, RouteProtocol, RouteScope, RouteType},
    AddressFamily, RouteNetlinkMessage,
};
use netlink_sys::protocols::NETLINK_ROUTE;

pub enum LinkID {
    ID(u32),
    Name(String),
}

/// Host exact IPv4 route as installed for a sandbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostRoute {
    pub dest: ipnet::Ipv4Net,
    /// Only optional for deletion, the kernel then matches on dest and oif alone.
    pub gw: Option<Ipv4Addr>,
    pub oif: u32,
}

impl std::fmt::Display for HostRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.gw {
            Some(gw) => write!(f, "(dest: {} ,gw: {}, oif: {})", self.dest, gw, self.oif),
            None => write!(f, "(dest: {} ,oif: {})", self.dest, self.oif),
        }
    }
}

pub struct NetlinkRoute;

impl NetlinkFamily for NetlinkRoute {
    const PROTOCOL: isize = NETLINK_ROUTE;
    type Message = RouteNetlinkMessage;
}

impl Socket<NetlinkRoute> {
    pub fn get_link(&mut self, id: LinkID) -> PluginResult<LinkMessage> {
        let mut msg = LinkMessage::default();

        let name = match id {
            LinkID::ID(id) => {
                msg.header.index = id;
                id.to_string()
            }
            LinkID::Name(name) => {
                msg.attributes.push(LinkAttribute::IfName(name.clone()));
                name
            }
        };

        let mut result = match self.make_netlink_request(RouteNetlinkMessage::GetLink(msg), 0) {
            Ok(result) => result,
            // kernel returns ENODEV for an unknown link
            Err(PluginError::Netlink(ref e)) if -e.raw_code() == libc::ENODEV => {
                return Err(PluginError::LinkNotFound(name));
            }
            Err(err) => return Err(err),
        };
        expect_netlink_result!(result, 1);
        match result.remove(0) {
            RouteNetlinkMessage::NewLink(m) => Ok(m),
            m => Err(PluginError::Message(format!(
                "unexpected netlink message type: {}",
                m.message_type()
            ))),
        }
    }

    // If filtering options are supplied, then only the ip addresses satisfying the filter are returned. Otherwise all ip addresses of all interfaces are returned
    pub fn dump_addresses(
        &mut self,
        interface_id_filter: Option<u32>,
    ) -> PluginResult<Vec<AddressMessage>> {
        let mut msg = AddressMessage::default();

        if let Some(id) = interface_id_filter {
            msg.header.index = id;
        }

        let results =
            self.make_netlink_request(RouteNetlinkMessage::GetAddress(msg), NLM_F_DUMP)?;

        let mut addresses = Vec::with_capacity(results.len());

        for res in results {
            match res {
                // without strict checking the kernel ignores the index so filter again here
                RouteNetlinkMessage::NewAddress(m) => {
                    if interface_id_filter.map_or(true, |id| id == m.header.index) {
                        addresses.push(m)
                    }
                }
                m => {
                    return Err(PluginError::Message(format!(
                        "unexpected netlink message type: {}",
                        m.message_type()
                    )))
                }
            };
        }
        Ok(addresses)
    }

    fn create_route_msg(route: &HostRoute) -> RouteMessage {
        let mut msg = RouteMessage::default();

        msg.header.table = libc::RT_TABLE_MAIN;
        msg.header.protocol = RouteProtocol::Static;
        msg.header.scope = RouteScope::Universe;
        msg.header.kind = RouteType::Unicast;
        msg.header.address_family = AddressFamily::Inet;
        msg.header.destination_prefix_length = route.dest.prefix_len();

        msg.attributes.push(RouteAttribute::Destination(RouteAddress::Inet(
            route.dest.addr(),
        )));
        if let Some(gw) = route.gw {
            msg.attributes
                .push(RouteAttribute::Gateway(RouteAddress::Inet(gw)));
        }
        if route.oif != 0 {
            msg.attributes.push(RouteAttribute::Oif(route.oif));
        }
        msg
    }

    /// Create the route or update an existing one with the same destination.
    pub fn replace_route(&mut self, route: &HostRoute) -> PluginResult<()> {
        let msg = Self::create_route_msg(route);
        info!("Replacing route {route}");

        let result = self.make_netlink_request(
            RouteNetlinkMessage::NewRoute(msg),
            NLM_F_ACK | NLM_F_CREATE | NLM_F_REPLACE,
        )?;
        expect_netlink_result!(result, 0);

        Ok(())
    }

    pub fn del_route(&mut self, route: &HostRoute) -> PluginResult<()> {
        let msg = Self::create_route_msg(route);
        info!("Deleting route {route}");

        let result = self.make_netlink_request(RouteNetlinkMessage::DelRoute(msg), NLM_F_ACK)?;
        expect_netlink_result!(result, 0);

        Ok(())
    }

    pub fn dump_routes(&mut self) -> PluginResult<Vec<RouteMessage>> {
        let mut msg = RouteMessage::default();

        msg.header.table = libc::RT_TABLE_MAIN;
        msg.header.protocol = RouteProtocol::Unspec;
        msg.header.scope = RouteScope::Universe;
        msg.header.kind = RouteType::Unicast;
        msg.header.address_family = AddressFamily::Inet;

        let results =
            self.make_netlink_request(RouteNetlinkMessage::GetRoute(msg), NLM_F_DUMP | NLM_F_ACK)?;

        let mut routes = Vec::with_capacity(results.len());

        for res in results {
            match res {
                RouteNetlinkMessage::NewRoute(m) => routes.push(m),
                m => {
                    return Err(PluginError::Message(format!(
                        "unexpected netlink message type: {}",
                        m.message_type()
                    )))
                }
            };
        }
        Ok(routes)
    }
}

/// Kernel link type as printed by `ip -d link`, empty for links without
/// link info such as physical devices or loopback.
pub fn link_kind(link: &LinkMessage) -> String {
    for attribute in &link.attributes {
        if let LinkAttribute::LinkInfo(infos) = attribute {
            for info in infos {
                if let LinkInfo::Kind(kind) = info {
                    return match kind {
                        InfoKind::MacVlan => "macvlan".to_string(),
                        InfoKind::MacVtap => "macvtap".to_string(),
                        InfoKind::Bridge => "bridge".to_string(),
                        InfoKind::Veth => "veth".to_string(),
                        InfoKind::Dummy => "dummy".to_string(),
                        InfoKind::Vlan => "vlan".to_string(),
                        InfoKind::Other(name) => name.clone(),
                        other => format!("{other:?}").to_lowercase(),
                    };
                }
            }
        }
    }
    String::new()
}

/// All IPv4 addresses in the order the kernel lists them.
pub fn ipv4_addresses(addresses: &[AddressMessage]) -> Vec<Ipv4Addr> {
    let mut result = Vec::new();
    for address in addresses {
        if address.header.family != AddressFamily::Inet {
            continue;
        }
        // IFA_LOCAL is the address of the interface, IFA_ADDRESS may be the peer on ptp links
        let local = address.attributes.iter().find_map(|a| match a {
            AddressAttribute::Local(IpAddr::V4(ip)) => Some(*ip),
            _ => None,
        });
        let addr = local.or_else(|| {
            address.attributes.iter().find_map(|a| match a {
                AddressAttribute::Address(IpAddr::V4(ip)) => Some(*ip),
                _ => None,
            })
        });
        if let Some(ip) = addr {
            result.push(ip);
        }
    }
    result
}

/// Returns true if the route message describes the given host route.
pub fn route_matches(msg: &RouteMessage, route: &HostRoute) -> bool {
    if msg.header.address_family != AddressFamily::Inet
        || msg.header.destination_prefix_length != route.dest.prefix_len()
    {
        return false;
    }
    let mut dest = None;
    let mut gw = None;
    let mut oif = None;
    for attribute in &msg.attributes {
        match attribute {
            RouteAttribute::Destination(RouteAddress::Inet(ip)) => dest = Some(*ip),
            RouteAttribute::Gateway(RouteAddress::Inet(ip)) => gw = Some(*ip),
            RouteAttribute::Oif(index) => oif = Some(*index),
            _ => {}
        }
    }
    dest == Some(route.dest.addr())
        && (route.gw.is_none() || gw == route.gw)
        && (route.oif == 0 || oif == Some(route.oif))
}
