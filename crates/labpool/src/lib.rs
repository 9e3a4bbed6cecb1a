#![deny(clippy::await_holding_refcell_ref)]

pub mod client;
pub mod common;
pub mod server;
pub mod transfer;

pub type Error = crate::common::error::LpError;
pub type Result<T> = std::result::Result<T, Error>;

// Reexports
pub use zamek;
pub use zamek::WrappedRcRefCell;

pub const LP_VERSION: &str = {
    match option_env!("LP_BUILD_VERSION") {
        Some(version) => version,
        None => const_format::concatcp!(env!("CARGO_PKG_VERSION"), "-dev"),
    }
};
