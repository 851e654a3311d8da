use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::network::constants;

pub type PluginResult<T> = Result<T, PluginError>;

/// wrap any result into a PluginError and add the given msg
#[macro_export]
macro_rules! wrap {
    ($result:expr, $msg:expr) => {
        $result.map_err(|err| $crate::error::PluginError::wrap($msg, err.into()))
    };
}

/// Contains a list of errors, this is useful for DEL since we should cleanup
/// as much local state as possible before returning all encountered errors.
#[derive(Debug)]
pub struct PluginErrorList(Vec<PluginError>);

impl PluginErrorList {
    pub fn new() -> Self {
        Self(vec![])
    }

    pub fn push(&mut self, err: PluginError) {
        match err {
            // make sure the flatten the error list, nested lists would just look ugly
            PluginError::List(mut list) => self.0.append(&mut list.0),
            err => self.0.push(err),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Turn the collected errors into a result, Ok when nothing was pushed.
    pub fn into_result(mut self) -> PluginResult<()> {
        match self.0.len() {
            0 => Ok(()),
            1 => Err(self.0.remove(0)),
            _ => Err(PluginError::List(self)),
        }
    }
}

// clippy wants the default implementation even if it is not needed
impl Default for PluginErrorList {
    fn default() -> Self {
        Self::new()
    }
}

pub trait ErrorWrap<T> {
    /// wrap PluginResult error into a PluginError and add the given msg
    fn wrap<S>(self, msg: S) -> PluginResult<T>
    where
        S: Into<String>;
}

impl<T> ErrorWrap<T> for PluginResult<T> {
    fn wrap<S>(self, msg: S) -> PluginResult<T>
    where
        S: Into<String>,
    {
        self.map_err(|err| PluginError::wrap(msg, err))
    }
}

/// The main plugin error type
#[derive(Debug)]
pub enum PluginError {
    // A string message
    Message(String),
    // A chain of multiple errors
    Chain(String, Box<PluginError>),

    /// Invalid or incomplete network configuration on stdin.
    Config(String),
    /// Malformed CNI_ARGS or missing CNI_* environment values.
    Args(String),
    /// The network configuration asks for a CNI version we cannot speak.
    IncompatibleVersion(String),
    /// The master interface does not exist on the host.
    LinkNotFound(String),
    /// The IPAM delegate failed, code is the one reported by the delegate.
    Delegate { code: u32, msg: String },

    Io(std::io::Error),

    Serde(serde_json::Error),

    Netlink(netlink_packet_core::error::ErrorMessage),

    List(PluginErrorList),
}

/// CNI error object as written to stdout on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonError {
    #[serde(rename = "cniVersion", default, skip_serializing_if = "String::is_empty")]
    pub cni_version: String,
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub msg: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}

impl PluginError {
    pub fn msg<S>(msg: S) -> PluginError
    where
        S: Into<String>,
    {
        PluginError::Message(msg.into())
    }

    pub fn config<S>(msg: S) -> PluginError
    where
        S: Into<String>,
    {
        PluginError::Config(msg.into())
    }

    pub fn args<S>(msg: S) -> PluginError
    where
        S: Into<String>,
    {
        PluginError::Args(msg.into())
    }

    pub fn wrap<S>(msg: S, chained: PluginError) -> PluginError
    where
        S: Into<String>,
    {
        PluginError::Chain(msg.into(), Box::new(chained))
    }

    /// CNI error code for this error, the innermost error of a chain decides.
    pub fn code(&self) -> u32 {
        match self.unwrap() {
            PluginError::IncompatibleVersion(_) => constants::CNI_ERR_INCOMPATIBLE_VERSION,
            PluginError::Args(_) => constants::CNI_ERR_INVALID_ENV,
            PluginError::Io(_) => constants::CNI_ERR_IO,
            PluginError::Serde(_) => constants::CNI_ERR_DECODE,
            PluginError::Config(_) => constants::CNI_ERR_INVALID_NETWORK_CONFIG,
            PluginError::LinkNotFound(_) => constants::ERR_LINK_NOT_FOUND,
            PluginError::Netlink(_) => constants::ERR_ROUTE,
            PluginError::Delegate { code, .. } => *code,
            PluginError::List(list) => list
                .0
                .first()
                .map(|e| e.code())
                .unwrap_or(constants::ERR_GENERIC),
            _ => constants::ERR_GENERIC,
        }
    }

    /// Print the error as CNI error object on stdout, this is what the
    /// container runtime parses when we exit non zero.
    pub fn print_json(&self, cni_version: &str) {
        let to_json = JsonError {
            cni_version: cni_version.to_string(),
            code: self.code(),
            msg: self.to_string(),
            details: String::new(),
        };
        println!(
            "{}",
            serde_json::to_string(&to_json).unwrap_or(format!(
                "Failed to serialize error message: {}",
                to_json.msg
            ))
        );
    }

    /// Get the exit code the plugin should exit with
    pub fn get_exit_code(&self) -> i32 {
        1
    }

    /// unwrap the chain error recursively until we a non chain type error
    pub fn unwrap(&self) -> &PluginError {
        match self {
            PluginError::Chain(_, inner) => inner.unwrap(),
            _ => self,
        }
    }
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginError::Message(s) => write!(f, "{s}"),
            PluginError::Chain(s, e) => write!(f, "{s}: {e}"),
            PluginError::Config(s) => write!(f, "invalid network config: {s}"),
            PluginError::Args(s) => write!(f, "invalid arguments: {s}"),
            PluginError::IncompatibleVersion(s) => write!(f, "incompatible CNI version: {s}"),
            PluginError::LinkNotFound(s) => write!(f, "link {s} not found"),
            PluginError::Delegate { msg, .. } => write!(f, "{msg}"),
            PluginError::Io(e) => write!(f, "IO error: {e}"),
            PluginError::Serde(e) => write!(f, "JSON Decoding error: {e}"),
            PluginError::Netlink(e) => write!(f, "Netlink error: {e}"),
            PluginError::List(list) => {
                if list.0.len() == 1 {
                    write!(f, "{}", list.0[0])
                } else {
                    write!(f, "stable-ipam encountered multiple errors:")?;
                    for e in &list.0 {
                        write!(f, "\n\t- {e}")?;
                    }
                    Ok(())
                }
            }
        }
    }
}

impl Error for PluginError {}

impl From<std::io::Error> for PluginError {
    fn from(err: std::io::Error) -> PluginError {
        PluginError::Io(err)
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> PluginError {
        PluginError::Serde(err)
    }
}

impl From<ipnet::PrefixLenError> for PluginError {
    fn from(e: ipnet::PrefixLenError) -> Self {
        PluginError::Message(format!("{e}"))
    }
}

impl From<netlink_packet_core::error::ErrorMessage> for PluginError {
    fn from(err: netlink_packet_core::error::ErrorMessage) -> Self {
        PluginError::Netlink(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_display_and_code() {
        let err = PluginError::wrap(
            "save entry for container abc",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied).into(),
        );
        assert!(err.to_string().starts_with("save entry for container abc: IO error"));
        assert_eq!(err.code(), constants::CNI_ERR_IO);
    }

    #[test]
    fn test_error_list() {
        let mut list = PluginErrorList::new();
        assert!(list.is_empty());
        list.push(PluginError::msg("first"));
        let mut nested = PluginErrorList::new();
        nested.push(PluginError::msg("second"));
        nested.push(PluginError::msg("third"));
        list.push(PluginError::List(nested));

        let err = list.into_result().expect_err("list should be an error");
        assert_eq!(
            err.to_string(),
            "stable-ipam encountered multiple errors:\n\t- first\n\t- second\n\t- third"
        );
    }

    #[test]
    fn test_empty_list_is_ok() {
        assert!(PluginErrorList::new().into_result().is_ok());
    }

    #[test]
    fn test_delegate_code_is_kept() {
        let err = PluginError::wrap(
            "ipam plugin host-local failed",
            PluginError::Delegate {
                code: 11,
                msg: "try again".to_string(),
            },
        );
        assert_eq!(err.code(), 11);
    }
}
