//! Releases the address and removes everything ADD left on the host.
//! DEL must be idempotent, so a missing entry, route or link is not an error.
use log::{debug, warn};

use crate::{
    error::{ErrorWrap, PluginError, PluginErrorList, PluginResult},
    ipam::{delegate::IpamDelegate, store::FileStore},
    network::{
        route::{self, ContainerState, HostNetwork},
        types::NetConf,
    },
};

use super::{CmdArgs, Command};

pub fn exec(
    args: &CmdArgs,
    host: &mut dyn HostNetwork,
    ipam: &dyn IpamDelegate,
) -> PluginResult<()> {
    let conf = NetConf::load(&args.stdin_data)?;
    args.validate(Command::Del)?;
    let id = args.container_id.as_str();
    debug!("DEL container {id} on network {}", conf.name);

    let store = FileStore::new(conf.data_dir(), &conf.name)?;
    let entry = store.load(id)?;

    // a failing IPAM plugin does not stop the local cleanup
    let mut errors = PluginErrorList::new();

    let env = args.delegate_env(args.args.clone());
    if let Err(err) = ipam
        .exec_del(&conf.ipam.plugin, &env, &args.stdin_data)
        .wrap(format!("ipam release for container {id}"))
    {
        errors.push(err);
    }

    // the entry is the only record of the routed address, it is kept until
    // the route is gone so a retried DEL can still remove it
    let master = match entry {
        Some(_) => match host.master_link(&conf.master) {
            Ok(master) => Some(master),
            // routes through the master are gone with it
            Err(err) if matches!(err.unwrap(), PluginError::LinkNotFound(_)) => {
                warn!("master {} not found, skipping route removal", conf.master);
                None
            }
            Err(err) => {
                errors.push(PluginError::wrap(
                    format!("resolve master {} for container {id}", conf.master),
                    err,
                ));
                return errors.into_result();
            }
        },
        None => None,
    };

    let state = ContainerState::inspect(entry, master.as_ref());
    if let (Some(ip), Some(master)) = (state.routed_ip(), master.as_ref()) {
        if let Err(err) = route::delete_route(&mut *host, master, ip, id) {
            errors.push(err);
            return errors.into_result();
        }
    }

    if let Err(err) = store.delete(id) {
        errors.push(err);
    }

    errors.into_result()
}
