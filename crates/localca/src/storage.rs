use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const PRODUCT_DIR: &str = "localca";
pub const ROOT_CERT_FILE: &str = "rootCA.pem";
pub const ROOT_KEY_FILE: &str = "rootCA-key.pem";

pub const ENV_CAROOT: &str = "CAROOT";
const ENV_XDG_DATA_HOME: &str = "XDG_DATA_HOME";
const ENV_LOCAL_APP_DATA: &str = "LocalAppData";
const ENV_HOME: &str = "HOME";
const ENV_USER_PROFILE: &str = "USERPROFILE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    Windows,
    MacOs,
    OtherUnix,
}

impl HostOs {
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::OtherUnix
        }
    }
}

/// Where the root certificate and key live on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootPaths {
    pub dir: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl RootPaths {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            cert: dir.join(ROOT_CERT_FILE),
            key: dir.join(ROOT_KEY_FILE),
            dir,
        }
    }

    pub fn cert_exists(&self) -> bool {
        path_exists(&self.cert)
    }

    pub fn key_exists(&self) -> bool {
        path_exists(&self.key)
    }
}

/// Resolve the storage directory from the process environment.
pub fn storage_location() -> Option<PathBuf> {
    root_dir_from(HostOs::current(), |name| std::env::var_os(name))
}

/// Resolve the product storage directory for `os` given an environment lookup.
///
/// Checked in order: `CAROOT`, the OS per-user data directory
/// (`LocalAppData` on Windows), `XDG_DATA_HOME`, then the platform default
/// under the home directory. Empty variables count as unset.
pub fn root_dir_from<F>(os: HostOs, env: F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<OsString>,
{
    let lookup = |name: &str| env(name).filter(|value| !value.is_empty());

    if let Some(dir) = lookup(ENV_CAROOT) {
        return Some(PathBuf::from(dir).join(PRODUCT_DIR));
    }

    let base = match os {
        HostOs::Windows => lookup(ENV_LOCAL_APP_DATA)
            .map(PathBuf::from)
            .or_else(|| lookup(ENV_XDG_DATA_HOME).map(PathBuf::from))
            .or_else(|| {
                lookup(ENV_USER_PROFILE)
                    .map(|home| PathBuf::from(home).join("AppData").join("Local"))
            }),
        HostOs::MacOs => lookup(ENV_XDG_DATA_HOME).map(PathBuf::from).or_else(|| {
            lookup(ENV_HOME)
                .map(|home| PathBuf::from(home).join("Library").join("Application Support"))
        }),
        HostOs::OtherUnix => lookup(ENV_XDG_DATA_HOME).map(PathBuf::from).or_else(|| {
            lookup(ENV_HOME).map(|home| PathBuf::from(home).join(".local").join("share"))
        }),
    }?;

    Some(base.join(PRODUCT_DIR))
}

pub(crate) fn path_exists(path: &Path) -> bool {
    std::fs::metadata(path).is_ok()
}
