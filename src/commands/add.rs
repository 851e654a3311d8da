//! Allocates an address through the IPAM plugin and keeps the sandbox MAC
//! and, for macvlan masters, its host route stable across invocations.
use std::net::IpAddr;

use log::{debug, info};

use crate::{
    error::{ErrorWrap, PluginError, PluginResult},
    ipam::{delegate::IpamDelegate, store::FileStore},
    network::{
        args::{append_arg, CniArgs},
        constants,
        mac::MacAddress,
        route::{self, ContainerState, HostNetwork},
        types::{Interface, NetConf},
        version::{self, EncodedResult},
    },
};

use super::{CmdArgs, Command};

pub fn exec(
    args: &CmdArgs,
    host: &mut dyn HostNetwork,
    ipam: &dyn IpamDelegate,
) -> PluginResult<EncodedResult> {
    let conf = NetConf::load(&args.stdin_data)?;
    args.validate(Command::Add)?;
    let cni_args = CniArgs::parse(&args.args)?;
    let id = args.container_id.as_str();
    debug!("ADD container {id} on network {}", conf.name);

    // resolve the master before allocating so a missing link does not leak an address
    let master = host
        .master_link(&conf.master)
        .wrap(format!("resolve master {}", conf.master))?;

    let store = FileStore::new(conf.data_dir(), &conf.name)?;
    let state = ContainerState::inspect(store.load(id)?, Some(&master));

    let mut delegate_args = args.args.clone();
    let mac = match (cni_args.mac()?, state.entry()) {
        (Some(mac), _) => {
            debug!("Using mac {mac} from {}", constants::ENV_ARGS);
            mac
        }
        (None, Some(entry)) => {
            debug!("Using stored mac {} for container {id}", entry.mac);
            entry.mac
        }
        (None, None) => {
            let mac = MacAddress::random();
            debug!("Generated mac {mac} for container {id}");
            delegate_args = append_arg(&delegate_args, constants::ARG_MAC, &mac.to_string());
            mac
        }
    };

    let env = args.delegate_env(delegate_args);
    let mut result = ipam
        .exec_add(&conf.ipam.plugin, &env, &args.stdin_data)
        .wrap(format!("ipam allocation for container {id}"))?;

    let ip = result
        .ips
        .first()
        .map(|config| config.address.addr())
        .ok_or_else(|| {
            PluginError::msg(format!(
                "ipam plugin {:?} returned no address for container {id}",
                conf.ipam.plugin
            ))
        })?;

    let name = if master.is_macvlan() {
        if let Some(old) = state.routed_ip() {
            if IpAddr::V4(old) != ip {
                info!("Address of container {id} changed from {old} to {ip}");
                route::delete_route(&mut *host, &master, old, id)?;
            }
        }
        // stored before the route exists so a failed ADD is simply retried
        store.save(id, ip, mac)?;
        route::create_route(&mut *host, &master, ip, id)?;
        if conf.ipam.via.is_empty() {
            args.ifname.clone()
        } else {
            conf.ipam.via.clone()
        }
    } else {
        store.save(id, ip, mac)?;
        master.name.clone()
    };

    let index = result.interfaces.len();
    result.interfaces.push(Interface {
        name,
        mac: mac.to_string(),
        ..Default::default()
    });
    // tie the addresses to the interface carrying the stable mac
    for config in result.ips.iter_mut().filter(|c| c.interface.is_none()) {
        config.interface = Some(index);
    }

    version::encode_result(result, &conf.cni_version)
}
