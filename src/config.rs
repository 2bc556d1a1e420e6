use crate::Error;
use std::io::ErrorKind;
use std::fs;
use std::path::{Path, PathBuf};
use serde::{Serialize, Deserialize};


/// Name of the main config file in the app's folder
pub const FILENAME: &'static str = "vitrine.config";


/// The app's config
#[allow(non_snake_case)]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// IP address to serve on.
    /// Default : 127.0.0.1
    #[serde(default="config_default_address")]
    pub ADDRESS: String,

    /// Port to serve on.
    /// Default : 8000
    #[serde(default="config_default_port")]
    pub PORT: u16,

    /// Path to the directory holding the photos database, created on demand.
    /// Write access is required.
    /// Default : "data" in the app's folder
    #[serde(default="config_default_data_dir")]
    pub DATA_DIR: String,

    /// Name of the JSON file used as the photos database, inside DATA_DIR.
    /// Default : "photos.json"
    #[serde(default="config_default_database_filename")]
    pub DATABASE_FILENAME: String,

    /// Path to a prebuilt front-end served as static files on `/`. The app starts
    /// normally if this directory doesn't exist.
    /// Default : "static" in the app's folder
    #[serde(default="config_default_static_dir")]
    pub STATIC_DIR: String,

    /// Maximum size of a JSON request body, in MiB. Photos are uploaded as base64 data
    /// URLs, which are about a third larger than the original file.
    /// Default : 20
    #[serde(default="config_default_max_upload_size")]
    pub MAX_UPLOAD_SIZE: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ADDRESS: config_default_address(),
            PORT: config_default_port(),
            DATA_DIR: config_default_data_dir(),
            DATABASE_FILENAME: config_default_database_filename(),
            STATIC_DIR: config_default_static_dir(),
            MAX_UPLOAD_SIZE: config_default_max_upload_size(),
        }
    }
}

impl Config {

    /// Read the main config file and deserialize it into a Config struct
    pub fn read() -> Result<Self, Error> {
        Self::read_path(FILENAME)
    }

    /// Read the config file at the given location and deserialize it into a Config struct.
    /// A missing file is not an error : every key takes its default value.
    pub fn read_path<P>(path: P) -> Result<Self, Error>
        where P: AsRef<Path>
    {
        match fs::read_to_string(&path) {
            Ok(content) => Ok(toml::from_str(content.as_str())?),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                eprintln!("Config file \"{}\" not found, using default settings", path.as_ref().display());
                Ok(Self::default())
            }
            Err(error) => Err(Error::FileError(error, PathBuf::from(path.as_ref()))),
        }
    }

    /// Try to read and parse the config file
    /// In case of error, print it to stderr and exit with a status code of -1
    pub fn read_or_exit() -> Self {
        Self::read()
            .unwrap_or_else(|e| match e {
                Error::FileError(error, path) => {
                    eprintln!("Error, unable to open the config file \"{}\" : {}", path.display(), error);
                    std::process::exit(-1);
                }
                Error::ParseError(error) => {
                    eprintln!("Error, unable to parse the config file \"{}\" : {}", FILENAME, error);
                    std::process::exit(-1);
                }
                _ => std::process::exit(-1),
            })
    }

    /// Full path to the photos database file
    pub fn database_path(&self) -> PathBuf {
        let mut path = PathBuf::from(&self.DATA_DIR);
        path.push(&self.DATABASE_FILENAME);
        path
    }

}


// Default values for config keys

fn config_default_address() -> String {
    "127.0.0.1".to_string()
}

fn config_default_port() -> u16 {
    8000
}

fn config_default_data_dir() -> String {
    "data".to_string()
}

fn config_default_database_filename() -> String {
    "photos.json".to_string()
}

fn config_default_static_dir() -> String {
    "static".to_string()
}

fn config_default_max_upload_size() -> u64 {
    20 // MiB
}
