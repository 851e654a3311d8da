//! CNI_ARGS handling, a `;` separated list of `key=value` pairs.

use crate::error::{PluginError, PluginResult};

use super::{constants, mac::MacAddress};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CniArgs {
    pairs: Vec<(String, String)>,
}

impl CniArgs {
    /// Parse the raw CNI_ARGS value. An empty string means no arguments,
    /// every other pair must have exactly one `=` with a non empty key and value.
    pub fn parse(raw: &str) -> PluginResult<CniArgs> {
        let mut pairs = Vec::new();
        if raw.is_empty() {
            return Ok(CniArgs { pairs });
        }

        for pair in raw.split(';') {
            let kv: Vec<&str> = pair.split('=').collect();
            if kv.len() != 2 {
                return Err(PluginError::args(format!(
                    "CNI_ARGS: invalid pair {pair:?}"
                )));
            }
            let (key, value) = (kv[0], kv[1]);
            if key.is_empty() || value.is_empty() {
                return Err(PluginError::args(format!(
                    "CNI_ARGS: empty key or value in pair {pair:?}"
                )));
            }
            pairs.push((key.to_string(), value.to_string()));
        }

        Ok(CniArgs { pairs })
    }

    /// Value of the last pair with the given key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Explicit mac address override, if any.
    pub fn mac(&self) -> PluginResult<Option<MacAddress>> {
        match self.get(constants::ARG_MAC) {
            Some(mac) => match mac.parse() {
                Ok(mac) => Ok(Some(mac)),
                Err(err) => Err(PluginError::wrap(
                    "CNI_ARGS: invalid mac",
                    PluginError::args(err.to_string()),
                )),
            },
            None => Ok(None),
        }
    }
}

/// Append `key=value` to a raw CNI_ARGS string keeping every existing pair.
pub fn append_arg(raw: &str, key: &str, value: &str) -> String {
    if raw.is_empty() {
        format!("{key}={value}")
    } else {
        format!("{raw};{key}={value}")
    }
}
