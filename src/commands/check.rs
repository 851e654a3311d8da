use log::debug;

use crate::{
    error::{ErrorWrap, PluginError, PluginResult},
    ipam::{delegate::IpamDelegate, store::FileStore},
    network::{
        args::CniArgs,
        route::{ContainerState, HostNetwork},
        types::NetConf,
        version,
    },
};

use super::{CmdArgs, Command};

/// Verify that what ADD set up for the container is still in place.
pub fn exec(
    args: &CmdArgs,
    host: &mut dyn HostNetwork,
    ipam: &dyn IpamDelegate,
) -> PluginResult<()> {
    let conf = NetConf::load(&args.stdin_data)?;
    if !version::supports_check(&conf.cni_version) {
        return Err(PluginError::IncompatibleVersion(format!(
            "config version {} does not support the CHECK command",
            conf.cni_version
        )));
    }
    args.validate(Command::Check)?;
    let cni_args = CniArgs::parse(&args.args)?;
    let id = args.container_id.as_str();
    debug!("CHECK container {id} on network {}", conf.name);

    let master = host
        .master_link(&conf.master)
        .wrap(format!("resolve master {}", conf.master))?;

    let store = FileStore::new(conf.data_dir(), &conf.name)?;
    let state = ContainerState::inspect(store.load(id)?, Some(&master));
    let entry = state
        .entry()
        .ok_or_else(|| PluginError::msg(format!("no stored entry for container {id}")))?;

    if let Some(mac) = cni_args.mac()? {
        if mac != entry.mac {
            return Err(PluginError::msg(format!(
                "container {id} uses mac {} but {mac} was requested",
                entry.mac
            )));
        }
    }

    ipam.exec_check(
        &conf.ipam.plugin,
        &args.delegate_env(args.args.clone()),
        &args.stdin_data,
    )
    .wrap(format!("ipam check for container {id}"))?;

    if let Some(ip) = state.routed_ip() {
        let found = host
            .has_route(&master, ip)
            .wrap(format!("list routes via {} for container {id}", master.name))?;
        if !found {
            return Err(PluginError::msg(format!(
                "route to {ip} via {} for container {id} is missing",
                master.name
            )));
        }
    }

    Ok(())
}
