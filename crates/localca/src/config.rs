use std::path::PathBuf;

use crate::storage::{storage_location, RootPaths};
use crate::CaError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthorityConfig {
    pub root_dir: Option<PathBuf>,
    pub verbose: bool,
}

impl AuthorityConfig {
    /// Storage directory resolved from `CAROOT`, the OS data directories and `HOME`.
    pub fn from_env() -> Self {
        Self {
            root_dir: storage_location(),
            verbose: false,
        }
    }

    pub fn with_root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(dir.into());
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn validate(&self) -> Result<(), CaError> {
        match &self.root_dir {
            Some(dir) if dir.as_os_str().is_empty() => Err(CaError::NoStorageLocation),
            _ => Ok(()),
        }
    }

    pub(crate) fn root_paths(&self) -> Option<RootPaths> {
        self.root_dir.as_ref().map(|dir| RootPaths::in_dir(dir.clone()))
    }
}
