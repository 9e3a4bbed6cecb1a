pub mod commands;
pub mod globalsettings;
pub mod output;
pub mod utils;

pub use globalsettings::GlobalSettings;

use crate::common::serverdir::default_server_directory;
use std::path::PathBuf;

pub fn default_server_directory_path() -> PathBuf {
    default_server_directory()
}
