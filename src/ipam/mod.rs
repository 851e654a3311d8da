pub mod delegate;
pub mod store;
