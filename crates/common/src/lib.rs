pub mod config;
pub mod hash;

#[cfg(feature = "logging")]
pub mod logging;
