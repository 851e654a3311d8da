// Crate contains the CNI types which are accepted and returned by the plugin.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::error::{PluginError, PluginResult};

use super::constants;

/// NetConf is the network configuration handed to the plugin on stdin.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetConf {
    /// CNI version of this config, the result is encoded in this version.
    #[serde(default)]
    pub cni_version: String,

    /// Name of the network, used as sub directory of the data dir.
    #[serde(default)]
    pub name: String,

    /// Name of this plugin binary.
    #[serde(rename = "type", default)]
    pub plugin_type: String,

    /// Host interface which is virtualized for the sandbox.
    #[serde(default)]
    pub master: String,

    /// Root directory for the persisted entries.
    #[serde(default)]
    pub data_dir: String,

    /// Delegate IPAM plugin configuration.
    #[serde(default)]
    pub ipam: IpamConf,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IpamConf {
    /// Name of the IPAM plugin binary to exec.
    #[serde(rename = "type", default)]
    pub plugin: String,

    /// Interface name reported in the result when routing through a macvlan master.
    #[serde(default)]
    pub via: String,
}

impl NetConf {
    /// Parse and validate the raw stdin config.
    pub fn load(bytes: &[u8]) -> PluginResult<NetConf> {
        let mut conf: NetConf = serde_json::from_slice(bytes)
            .map_err(|e| PluginError::config(format!("failed to parse network config: {e}")))?;

        if conf.cni_version.is_empty() {
            conf.cni_version = constants::IMPLICIT_CNI_VERSION.to_string();
        }
        if !constants::SUPPORTED_VERSIONS.contains(&conf.cni_version.as_str()) {
            return Err(PluginError::IncompatibleVersion(format!(
                "config version {} is not one of {:?}",
                conf.cni_version,
                constants::SUPPORTED_VERSIONS
            )));
        }
        if conf.master.is_empty() {
            return Err(PluginError::config(
                "\"master\" field is required. It specifies the host interface name to virtualize",
            ));
        }
        validate_network_name(&conf.name)?;

        Ok(conf)
    }

    pub fn data_dir(&self) -> PathBuf {
        match self.data_dir.as_str() {
            "" => PathBuf::from(constants::DEFAULT_DATA_DIR),
            dir => PathBuf::from(dir),
        }
    }
}

/// The name is the store sub directory, it must stay below the data dir.
fn validate_network_name(name: &str) -> PluginResult<()> {
    if name.is_empty() {
        return Err(PluginError::config("\"name\" field is required"));
    }
    if name == "." || name == ".." || name.contains('/') {
        return Err(PluginError::config(format!("invalid network name {name:?}")));
    }
    Ok(())
}

/// Result in the current CNI schema, this is what every delegate result
/// gets converted to and what ADD builds up before encoding.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CniResult {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<IpConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,

    #[serde(default, skip_serializing_if = "Dns::is_empty")]
    pub dns: Dns,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sandbox: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpConfig {
    /// Index into the interfaces list of the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<usize>,

    pub address: IpNet,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub dst: IpNet,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw: Option<IpAddr>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dns {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Dns {
    pub fn is_empty(&self) -> bool {
        self.nameservers.is_empty()
            && self.domain.is_empty()
            && self.search.is_empty()
            && self.options.is_empty()
    }
}
