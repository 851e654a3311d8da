//Following module contains all the network constants

// default root for the per network entry directories
pub const DEFAULT_DATA_DIR: &str = "/var/lib/cni/stable-ipam";

// link kind reported by the kernel for macvlan devices, the only kind that needs host routes
pub const LINK_KIND_MACVLAN: &str = "macvlan";

// key in CNI_ARGS carrying the mac address
pub const ARG_MAC: &str = "mac";

// IFNAMSIZ - 1
pub const MAX_IFNAME_LEN: usize = 15;

// CNI environment variables
pub const ENV_COMMAND: &str = "CNI_COMMAND";
pub const ENV_CONTAINER_ID: &str = "CNI_CONTAINERID";
pub const ENV_NETNS: &str = "CNI_NETNS";
pub const ENV_IFNAME: &str = "CNI_IFNAME";
pub const ENV_ARGS: &str = "CNI_ARGS";
pub const ENV_PATH: &str = "CNI_PATH";

// CNI versions we can read from delegates and write back to the runtime
pub const CURRENT_CNI_VERSION: &str = "1.0.0";
pub const SUPPORTED_VERSIONS: &[&str] = &["0.1.0", "0.2.0", "0.3.0", "0.3.1", "0.4.0", "1.0.0", "1.1.0"];
// the CNI config decoder treats a missing cniVersion as this version
pub const IMPLICIT_CNI_VERSION: &str = "0.1.0";

// well known CNI error codes
pub const CNI_ERR_INCOMPATIBLE_VERSION: u32 = 1;
pub const CNI_ERR_INVALID_ENV: u32 = 4;
pub const CNI_ERR_IO: u32 = 5;
pub const CNI_ERR_DECODE: u32 = 6;
pub const CNI_ERR_INVALID_NETWORK_CONFIG: u32 = 7;

// plugin specific error codes, must be >= 100
pub const ERR_GENERIC: u32 = 100;
pub const ERR_LINK_NOT_FOUND: u32 = 101;
pub const ERR_ROUTE: u32 = 102;
