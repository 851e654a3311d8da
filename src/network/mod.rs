pub mod args;
pub mod constants;
pub mod mac;
pub mod netlink;
pub mod netlink_route;
pub mod route;
pub mod types;
pub mod version;
