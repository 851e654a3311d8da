use serde::Serialize;

use crate::network::constants;

/// Answer to the CNI VERSION command.
#[derive(Debug, Serialize)]
pub struct VersionInfo {
    #[serde(rename = "cniVersion")]
    pub cni_version: &'static str,
    #[serde(rename = "supportedVersions")]
    pub supported_versions: &'static [&'static str],
}

pub fn exec() -> VersionInfo {
    VersionInfo {
        cni_version: constants::CURRENT_CNI_VERSION,
        supported_versions: constants::SUPPORTED_VERSIONS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        let out = serde_json::to_value(exec()).unwrap();
        assert_eq!(out["cniVersion"], "1.0.0");
        assert_eq!(out["supportedVersions"].as_array().unwrap().len(), 7);
        assert_eq!(out["supportedVersions"][6], "1.1.0");
    }
}
