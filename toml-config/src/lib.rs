#![deny(clippy::unwrap_used, clippy::allow_attributes_without_reason)]
#![warn(clippy::perf, clippy::complexity, clippy::pedantic, clippy::suspicious)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    reason = "We're not going to write comprehensive docs"
)]

//! Loading of TOML configuration files into typed configuration structs.
//!
//! A configuration type implements [`TomlConfig`] for the raw file layout `F` it is converted from.

use serde::de::DeserializeOwned;
use std::{
    ffi::OsStr,
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Refusing to load {0}, file extension isn't .toml")]
    FileExtension(PathBuf),
    #[error("Failed to read config file {path}")]
    ReadFile { path: PathBuf, source: io::Error },
    #[error("Failed to parse config file {path}")]
    ParseFile {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to parse config")]
    Parse(#[from] toml::de::Error),
    #[error("No config file found, tried {0:?}")]
    NotFound(Vec<PathBuf>),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// The conversion from `F` validates the parsed values, rejecting them with [`Error::Invalid`].
pub trait TomlConfig<F: DeserializeOwned>: Sized + TryFrom<F, Error = Error> {
    /// Parses TOML text and initializes a [`Self`].
    fn from_toml_str(toml: &str) -> Result<Self, Error> {
        let conf: F = toml::from_str(toml)?;
        conf.try_into()
    }

    /// Loads a .toml file from the filesystem, parses it, and initializes a [`Self`].
    fn load_toml_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if path.extension() != Some(OsStr::new("toml")) {
            return Err(Error::FileExtension(path.to_path_buf()));
        }
        let toml = std::fs::read_to_string(path).map_err(|e| Error::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let conf: F = toml::from_str(&toml).map_err(|e| Error::ParseFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        conf.try_into()
    }

    /// Loads the first existing file of `paths`.
    ///
    /// Missing files are skipped, any other failure is returned as is.
    fn load_first_toml_file<P: AsRef<Path>>(
        paths: impl IntoIterator<Item = P>,
    ) -> Result<Self, Error> {
        let mut tried = Vec::new();
        for path in paths {
            match Self::load_toml_file(&path) {
                Err(Error::ReadFile { path, source }) if source.kind() == io::ErrorKind::NotFound => {
                    tried.push(path);
                }
                result => return result,
            }
        }
        Err(Error::NotFound(tried))
    }
}
