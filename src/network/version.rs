//! Conversion between the CNI result schemas.
//!
//! Delegates may answer in any supported version, internally everything is
//! converted to the current schema ([`CniResult`]). The final ADD result is
//! encoded back into the version the network config asked for.
//!
//! - 0.1.0, 0.2.0: `ip4`/`ip6` objects, routes nested per family
//! - 0.3.0, 0.3.1, 0.4.0: `ips` with an extra `version` field
//! - 1.0.0, 1.1.0: current schema

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::error::{PluginError, PluginResult};

use super::{
    constants,
    types::{CniResult, Dns, Interface, IpConfig, Route},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Schema {
    Legacy,
    Versioned,
    Current,
}

fn schema_for(version: &str) -> PluginResult<Schema> {
    match version {
        "0.1.0" | "0.2.0" => Ok(Schema::Legacy),
        "0.3.0" | "0.3.1" | "0.4.0" => Ok(Schema::Versioned),
        "1.0.0" | "1.1.0" => Ok(Schema::Current),
        v => Err(PluginError::IncompatibleVersion(format!(
            "result version {v} is not one of {:?}",
            constants::SUPPORTED_VERSIONS
        ))),
    }
}

/// Returns true when the given version knows the CHECK command.
pub fn supports_check(version: &str) -> bool {
    matches!(version, "0.4.0" | "1.0.0" | "1.1.0")
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyIpConfig {
    pub ip: IpNet,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
}

/// Superset of all schemas, used to read whatever a delegate prints.
#[derive(Deserialize)]
struct AnyResult {
    #[serde(rename = "cniVersion", default)]
    cni_version: String,
    #[serde(default)]
    interfaces: Vec<Interface>,
    #[serde(default)]
    ips: Vec<IpConfig>,
    #[serde(default)]
    routes: Vec<Route>,
    #[serde(default)]
    dns: Dns,
    #[serde(default)]
    ip4: Option<LegacyIpConfig>,
    #[serde(default)]
    ip6: Option<LegacyIpConfig>,
}

/// Decode a delegate result of any supported version into the current schema.
pub fn decode_result(bytes: &[u8]) -> PluginResult<CniResult> {
    let raw: AnyResult = serde_json::from_slice(bytes)?;
    let version = match raw.cni_version.as_str() {
        "" => constants::IMPLICIT_CNI_VERSION,
        v => v,
    };

    match schema_for(version)? {
        Schema::Legacy => {
            let mut result = CniResult {
                dns: raw.dns,
                ..Default::default()
            };
            for legacy in [raw.ip4, raw.ip6].into_iter().flatten() {
                result.ips.push(IpConfig {
                    interface: None,
                    address: legacy.ip,
                    gateway: legacy.gateway,
                });
                result.routes.extend(legacy.routes);
            }
            Ok(result)
        }
        Schema::Versioned | Schema::Current => Ok(CniResult {
            interfaces: raw.interfaces,
            ips: raw.ips,
            routes: raw.routes,
            dns: raw.dns,
        }),
    }
}

#[derive(Debug, Serialize)]
pub struct CurrentResult {
    #[serde(rename = "cniVersion")]
    pub cni_version: String,
    #[serde(flatten)]
    pub result: CniResult,
}

#[derive(Debug, Serialize)]
pub struct VersionedIpConfig {
    pub version: &'static str,
    #[serde(flatten)]
    pub config: IpConfig,
}

#[derive(Debug, Serialize)]
pub struct VersionedResult {
    #[serde(rename = "cniVersion")]
    pub cni_version: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<VersionedIpConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    #[serde(skip_serializing_if = "Dns::is_empty")]
    pub dns: Dns,
}

#[derive(Debug, Serialize)]
pub struct LegacyResult {
    #[serde(rename = "cniVersion")]
    pub cni_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip4: Option<LegacyIpConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip6: Option<LegacyIpConfig>,
    #[serde(skip_serializing_if = "Dns::is_empty")]
    pub dns: Dns,
}

/// A result ready to be written to stdout.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum EncodedResult {
    Current(CurrentResult),
    Versioned(VersionedResult),
    Legacy(LegacyResult),
}

/// Encode the result in the requested CNI version.
pub fn encode_result(result: CniResult, version: &str) -> PluginResult<EncodedResult> {
    let cni_version = version.to_string();
    match schema_for(version)? {
        Schema::Current => Ok(EncodedResult::Current(CurrentResult {
            cni_version,
            result,
        })),
        Schema::Versioned => Ok(EncodedResult::Versioned(VersionedResult {
            cni_version,
            interfaces: result.interfaces,
            ips: result
                .ips
                .into_iter()
                .map(|config| VersionedIpConfig {
                    version: if config.address.addr().is_ipv4() {
                        "4"
                    } else {
                        "6"
                    },
                    config,
                })
                .collect(),
            routes: result.routes,
            dns: result.dns,
        })),
        Schema::Legacy => {
            let mut ip4: Option<LegacyIpConfig> = None;
            let mut ip6: Option<LegacyIpConfig> = None;
            for config in result.ips {
                let slot = if config.address.addr().is_ipv4() {
                    &mut ip4
                } else {
                    &mut ip6
                };
                if slot.is_some() {
                    return Err(PluginError::msg(format!(
                        "cannot convert result to version {version}: multiple addresses of the same family"
                    )));
                }
                *slot = Some(LegacyIpConfig {
                    ip: config.address,
                    gateway: config.gateway,
                    routes: vec![],
                });
            }
            for route in result.routes {
                let slot = if route.dst.addr().is_ipv4() {
                    &mut ip4
                } else {
                    &mut ip6
                };
                match slot {
                    Some(config) => config.routes.push(route),
                    None => {
                        return Err(PluginError::msg(format!(
                            "cannot convert result to version {version}: route {} has no address of the same family",
                            route.dst
                        )))
                    }
                }
            }
            Ok(EncodedResult::Legacy(LegacyResult {
                cni_version,
                ip4,
                ip6,
                dns: result.dns,
            }))
        }
    }
}
