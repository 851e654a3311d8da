use std::{fmt, str::FromStr};

use macaddr::MacAddr6;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::PluginError;

/// 48 bit hardware address, printed lowercase and colon separated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(MacAddr6);

impl MacAddress {
    pub fn new(bytes: [u8; 6]) -> Self {
        MacAddress(MacAddr6::from(bytes))
    }

    /// Random unicast, locally administered address.
    pub fn random() -> Self {
        let mut bytes: [u8; 6] = rand::thread_rng().gen();
        bytes[0] = (bytes[0] | 0x02) & 0xfe;
        MacAddress::new(bytes)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0.into_array()
    }
}

impl From<MacAddr6> for MacAddress {
    fn from(mac: MacAddr6) -> Self {
        MacAddress(mac)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let address = self
            .0
            .as_bytes()
            .iter()
            .map(|x| format!("{x:02x}"))
            .collect::<Vec<String>>()
            .join(":");
        write!(f, "{address}")
    }
}

impl FromStr for MacAddress {
    type Err = PluginError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        MacAddr6::from_str(input)
            .map(MacAddress)
            .map_err(|e| PluginError::msg(format!("unable to parse mac address {input:?}: {e}")))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = PluginError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_colon_and_dash() {
        let mac: MacAddress = "02:AB:cd:00:11:ff".parse().unwrap();
        assert_eq!(mac.octets(), [0x02, 0xab, 0xcd, 0x00, 0x11, 0xff]);
        assert_eq!(mac.to_string(), "02:ab:cd:00:11:ff");

        let dashed: MacAddress = "02-ab-cd-00-11-ff".parse().unwrap();
        assert_eq!(mac, dashed);
    }

    #[test]
    fn test_parse_invalid() {
        assert!("".parse::<MacAddress>().is_err());
        assert!("02:ab:cd:00:11".parse::<MacAddress>().is_err());
        assert!("02:ab:cd:00:11:ff:00".parse::<MacAddress>().is_err());
        assert!("02:ab:cd:00:11:zz".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_serde_lowercase() {
        let mac: MacAddress = serde_json::from_str("\"02:AB:CD:00:11:FF\"").unwrap();
        assert_eq!(mac, MacAddress::new([0x02, 0xab, 0xcd, 0x00, 0x11, 0xff]));
        assert_eq!(serde_json::to_string(&mac).unwrap(), "\"02:ab:cd:00:11:ff\"");
        assert!(serde_json::from_str::<MacAddress>("\"02:ab\"").is_err());
    }

    #[test]
    fn test_random_is_local_unicast() {
        for _ in 0..64 {
            let mac = MacAddress::random();
            let first = mac.octets()[0];
            assert_eq!(first & 0x01, 0, "{mac} must not be multicast");
            assert_eq!(first & 0x02, 0x02, "{mac} must be locally administered");
        }
    }
}
