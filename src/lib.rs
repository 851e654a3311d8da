pub mod commands;
pub mod error;
pub mod ipam;
pub mod network;
