use std::{
    ffi::OsString,
    fmt,
    io::{self, Read},
    str::FromStr,
};

use clap::Args;

use crate::{
    error::{PluginError, PluginResult},
    ipam::delegate::DelegateEnv,
    network::constants,
    wrap,
};

pub mod add;
pub mod check;
pub mod del;
pub mod version;


/// The CNI operation requested through CNI_COMMAND.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Add,
    Del,
    Check,
    Version,
}

impl FromStr for Command {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADD" => Ok(Command::Add),
            "DEL" => Ok(Command::Del),
            "CHECK" => Ok(Command::Check),
            "VERSION" => Ok(Command::Version),
            "" => Err(PluginError::args(format!(
                "{} env variable missing",
                constants::ENV_COMMAND
            ))),
            other => Err(PluginError::args(format!(
                "unknown {} {other:?}",
                constants::ENV_COMMAND
            ))),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Add => "ADD",
            Command::Del => "DEL",
            Command::Check => "CHECK",
            Command::Version => "VERSION",
        };
        f.write_str(name)
    }
}

/// Per invocation arguments, normally passed by the runtime as CNI_* env.
#[derive(Args, Debug, Clone, Default)]
pub struct CmdArgs {
    /// Container ID, the store key
    #[clap(long = "container-id", env = "CNI_CONTAINERID", default_value = "")]
    pub container_id: String,
    /// Path to the network namespace of the container
    #[clap(long, env = "CNI_NETNS", default_value = "")]
    pub netns: String,
    /// Interface name inside the container
    #[clap(long, env = "CNI_IFNAME", default_value = "")]
    pub ifname: String,
    /// Extra `;` separated key=value arguments
    #[clap(long = "cni-args", env = "CNI_ARGS", default_value = "")]
    pub args: String,
    /// `:` separated list of directories with CNI plugins
    #[clap(long = "cni-path", env = "CNI_PATH", default_value = "")]
    pub path: String,
    /// The raw network config
    #[clap(skip)]
    pub stdin_data: Vec<u8>,
}

impl CmdArgs {
    /// Make sure the runtime gave us everything the command needs.
    pub fn validate(&self, command: Command) -> PluginResult<()> {
        let mut missing = Vec::new();
        if self.container_id.is_empty() {
            missing.push(constants::ENV_CONTAINER_ID);
        }
        // the namespace may already be gone on DEL
        if self.netns.is_empty() && command != Command::Del {
            missing.push(constants::ENV_NETNS);
        }
        if self.ifname.is_empty() {
            missing.push(constants::ENV_IFNAME);
        }
        if self.path.is_empty() {
            missing.push(constants::ENV_PATH);
        }
        if !missing.is_empty() {
            return Err(PluginError::args(format!(
                "required env variables [{}] missing",
                missing.join(",")
            )));
        }

        validate_container_id(&self.container_id)?;
        validate_ifname(&self.ifname)
    }

    /// Environment for the IPAM plugin, `args` replaces CNI_ARGS.
    pub fn delegate_env(&self, args: String) -> DelegateEnv {
        DelegateEnv {
            container_id: self.container_id.clone(),
            netns: self.netns.clone(),
            ifname: self.ifname.clone(),
            args,
            path: self.path.clone(),
        }
    }
}

/// The container ID is used as file name so it must not be able to leave
/// the network directory.
pub fn validate_container_id(id: &str) -> PluginResult<()> {
    if id.is_empty() || id == "." || id == ".." {
        return Err(PluginError::args(format!("invalid container ID {id:?}")));
    }
    if let Some(c) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(PluginError::args(format!(
            "invalid character {c:?} in container ID {id:?}"
        )));
    }
    Ok(())
}

/// Same rules as the kernel's dev_valid_name().
pub fn validate_ifname(name: &str) -> PluginResult<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(PluginError::args(format!("invalid interface name {name:?}")));
    }
    if name.len() > constants::MAX_IFNAME_LEN {
        return Err(PluginError::args(format!(
            "interface name {name:?} is longer than {} characters",
            constants::MAX_IFNAME_LEN
        )));
    }
    if name
        .chars()
        .any(|c| c == '/' || c == ':' || c.is_whitespace())
    {
        return Err(PluginError::args(format!(
            "interface name {name:?} contains invalid characters"
        )));
    }
    Ok(())
}

/// Read the network config from the given file or from stdin.
pub fn read_config(file: Option<OsString>) -> PluginResult<Vec<u8>> {
    match file {
        Some(path) => Ok(wrap!(
            std::fs::read(&path),
            format!("read config file {path:?}")
        )?),
        None => {
            let mut buffer = Vec::new();
            wrap!(
                io::stdin().read_to_end(&mut buffer),
                "read config from stdin"
            )?;
            Ok(buffer)
        }
    }
}

/// cniVersion of a possibly invalid config, used to format error objects.
pub fn probe_cni_version(stdin_data: &[u8]) -> String {
    #[derive(serde::Deserialize)]
    struct Probe {
        #[serde(rename = "cniVersion", default)]
        cni_version: String,
    }

    match serde_json::from_slice::<Probe>(stdin_data) {
        Ok(probe) if !probe.cni_version.is_empty() => probe.cni_version,
        _ => constants::CURRENT_CNI_VERSION.to_string(),
    }
}
