use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use orion::kdf::SecretKey;
use serde::de::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::common::error::error;
use crate::transfer::auth::{deserialize_key, serialize_key};
use crate::LP_VERSION;

/// Directory holding the metadata of a running server: the access file with
/// the connection secret and the pool journal.
#[derive(Clone)]
pub struct ServerDir {
    path: PathBuf,
}

pub fn default_server_directory() -> PathBuf {
    let mut home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
    home.push(".labpool");
    home
}

const ACCESS_FILE: &str = "access.json";
const JOURNAL_FILE: &str = "journal.bin";

impl ServerDir {
    pub fn open(directory: &Path) -> crate::Result<Self> {
        if !directory.is_dir() {
            return error(format!("{directory:?} is not a directory"));
        }
        Ok(Self {
            path: std::path::absolute(directory)?,
        })
    }

    pub fn create(directory: &Path, record: &AccessRecord) -> crate::Result<ServerDir> {
        std::fs::create_dir_all(directory)?;
        let server_dir = Self {
            path: std::path::absolute(directory)?,
        };
        let access_file_path = server_dir.access_filename();
        if access_file_path.exists() {
            std::fs::remove_file(&access_file_path)?;
        }
        log::info!("Saving access file as '{access_file_path:?}'");
        store_access_record(record, access_file_path)?;
        Ok(server_dir)
    }

    pub fn path<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.path.join(path)
    }

    pub fn directory(&self) -> &Path {
        &self.path
    }

    pub fn access_filename(&self) -> PathBuf {
        self.path(ACCESS_FILE)
    }

    pub fn journal_filename(&self) -> PathBuf {
        self.path(JOURNAL_FILE)
    }

    pub fn read_access_record(&self) -> crate::Result<AccessRecord> {
        let record = load_access_file(self.access_filename())?;
        if record.version != LP_VERSION {
            return Err(crate::Error::VersionError(format!(
                "Version mismatch detected.\nServer was started with version {}, \
                but the current version is {LP_VERSION}.",
                record.version
            )));
        }
        Ok(record)
    }
}

fn serde_serialize_key<S: Serializer>(
    key: &Arc<SecretKey>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&serialize_key(key))
}

fn serde_deserialize_key<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Arc<SecretKey>, D::Error> {
    let key: String = Deserialize::deserialize(deserializer)?;
    deserialize_key(&key)
        .map(Arc::new)
        .map_err(|e| D::Error::custom(format!("Could not load secret key: {e}")))
}

/// Everything a client needs to reach and authenticate against the server.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccessRecord {
    version: String,
    host: String,
    port: u16,
    server_uid: String,
    start_date: DateTime<Utc>,
    pid: u32,
    #[serde(serialize_with = "serde_serialize_key")]
    #[serde(deserialize_with = "serde_deserialize_key")]
    secret_key: Arc<SecretKey>,
}

impl AccessRecord {
    pub fn new(host: String, port: u16, server_uid: String, secret_key: Arc<SecretKey>) -> Self {
        Self {
            version: LP_VERSION.to_string(),
            host,
            port,
            server_uid,
            start_date: Utc::now(),
            pid: std::process::id(),
            secret_key,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn server_uid(&self) -> &str {
        &self.server_uid
    }

    pub fn start_date(&self) -> &DateTime<Utc> {
        &self.start_date
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn secret_key(&self) -> &Arc<SecretKey> {
        &self.secret_key
    }
}

pub fn store_access_record<P: AsRef<Path>>(record: &AccessRecord, path: P) -> crate::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true).mode(0o400);

    let file = options.open(path)?;
    serde_json::to_writer_pretty(file, record)?;
    Ok(())
}

pub fn load_access_file<P: AsRef<Path>>(path: P) -> crate::Result<AccessRecord> {
    let file = std::fs::File::open(path)?;
    Ok(serde_json::from_reader(file)?)
}
