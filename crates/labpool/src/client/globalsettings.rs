use crate::client::output::OutputMode;
use std::path::{Path, PathBuf};

pub struct GlobalSettings {
    server_dir: PathBuf,
    user: String,
    output_mode: OutputMode,
}

impl GlobalSettings {
    pub fn new(server_dir: PathBuf, user: String, output_mode: OutputMode) -> Self {
        Self {
            server_dir,
            user,
            output_mode,
        }
    }

    pub fn server_directory(&self) -> &Path {
        &self.server_dir
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output_mode
    }
}
