use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::root::Root;
use crate::storage::{path_exists, HostOs};
use crate::CaError;

use super::privilege::PrivilegeHelper;
use super::runner::Invocation;
use super::{log_tool_output, operation_error, spawn_error, trust_record_name, TrustStore};

const NAME: &str = "NSS";
const CERTUTIL: &str = "certutil";
const READ_ONLY_MARKER: &str = "SEC_ERROR_READ_ONLY";

const FIREFOX_INSTALLS: &[&str] = &[
    "/usr/bin/firefox",
    "/usr/bin/firefox-nightly",
    "/usr/bin/firefox-developer-edition",
    "/snap/firefox",
    "/Applications/Firefox.app",
    "/Applications/FirefoxDeveloperEdition.app",
    "/Applications/Firefox Developer Edition.app",
    "/Applications/Firefox Nightly.app",
    "C:\\Program Files\\Mozilla Firefox",
];

/// Where NSS certificate databases may live.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NssLocations {
    /// Directories whose subdirectories are Firefox profiles.
    pub profile_roots: Vec<PathBuf>,
    /// Standalone NSS database directories.
    pub databases: Vec<PathBuf>,
    /// Firefox installations; their presence alone makes the store applicable.
    pub browser_installs: Vec<PathBuf>,
}

impl NssLocations {
    pub fn from_env() -> Self {
        let os = HostOs::current();
        let home_var = if os == HostOs::Windows {
            "USERPROFILE"
        } else {
            "HOME"
        };
        let home = std::env::var_os(home_var)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        Self::for_home(os, home.as_deref())
    }

    pub fn for_home(os: HostOs, home: Option<&Path>) -> Self {
        let mut locations = Self {
            profile_roots: Vec::new(),
            databases: Vec::new(),
            browser_installs: FIREFOX_INSTALLS.iter().map(PathBuf::from).collect(),
        };
        if let Some(home) = home {
            let profile_root = match os {
                HostOs::OtherUnix => home.join(".mozilla").join("firefox"),
                HostOs::MacOs => home
                    .join("Library")
                    .join("Application Support")
                    .join("Firefox")
                    .join("Profiles"),
                HostOs::Windows => home
                    .join("AppData")
                    .join("Roaming")
                    .join("Mozilla")
                    .join("Firefox")
                    .join("Profiles"),
            };
            locations.profile_roots.push(profile_root);
            locations.databases.push(home.join(".pki").join("nssdb"));
            locations
                .databases
                .push(home.join("snap/chromium/current/.pki/nssdb"));
        }
        locations.databases.push(PathBuf::from("/etc/pki/nssdb"));
        locations
    }
}

/// Firefox profiles and shared NSS databases, managed through `certutil`.
#[derive(Debug)]
pub struct NssDatabases {
    privilege: Arc<PrivilegeHelper>,
    locations: NssLocations,
    verbose: bool,
}

impl NssDatabases {
    pub fn new(privilege: Arc<PrivilegeHelper>, locations: NssLocations) -> Self {
        Self {
            privilege,
            locations,
            verbose: false,
        }
    }

    /// `sql:` or `dbm:` specifiers for every database found on disk.
    pub fn databases(&self) -> Vec<String> {
        let mut candidates = Vec::new();
        for profile_root in &self.locations.profile_roots {
            let Ok(entries) = fs::read_dir(profile_root) else {
                continue;
            };
            let mut profiles: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .collect();
            profiles.sort();
            candidates.extend(profiles);
        }
        candidates.extend(self.locations.databases.iter().cloned());

        candidates
            .into_iter()
            .filter(|dir| dir.is_dir())
            .filter_map(|dir| {
                if dir.join("cert9.db").exists() {
                    Some(format!("sql:{}", dir.display()))
                } else if dir.join("cert8.db").exists() {
                    Some(format!("dbm:{}", dir.display()))
                } else {
                    None
                }
            })
            .collect()
    }

    fn has_record(&self, database: &str, record: &str) -> bool {
        let invocation =
            Invocation::new(CERTUTIL).args(["-V", "-d", database, "-u", "L", "-n", record]);
        self.privilege
            .run(&invocation)
            .map(|output| output.success)
            .unwrap_or(false)
    }

    fn run_certutil(&self, invocation: &Invocation, operation: &str) -> Result<(), CaError> {
        let output = self
            .privilege
            .run_with_retry(invocation, READ_ONLY_MARKER)
            .map_err(|error| self.certutil_missing(invocation, error))?;
        log_tool_output(self.verbose, NAME, &output);
        if !output.success {
            return Err(operation_error(NAME, operation, &output.output));
        }
        Ok(())
    }

    fn certutil_missing(&self, invocation: &Invocation, error: std::io::Error) -> CaError {
        if error.kind() != std::io::ErrorKind::NotFound {
            return spawn_error(NAME, invocation, error);
        }
        match self.install_hint() {
            Some(hint) => CaError::backend(
                NAME,
                format!("certutil is not available; install it with `{hint}`"),
            ),
            None => CaError::backend(NAME, "certutil is not available"),
        }
    }

    fn install_hint(&self) -> Option<&'static str> {
        if cfg!(target_os = "macos") {
            return Some("brew install nss");
        }
        let runner = self.privilege.runner();
        [
            ("apt", "apt install libnss3-tools"),
            ("yum", "yum install nss-tools"),
            ("zypper", "zypper install mozilla-nss-tools"),
            ("xbps-install", "xbps-install nss"),
        ]
        .into_iter()
        .find(|(manager, _)| runner.program_exists(manager))
        .map(|(_, hint)| hint)
    }
}

impl TrustStore for NssDatabases {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_applicable(&self) -> bool {
        self.locations
            .profile_roots
            .iter()
            .chain(&self.locations.databases)
            .chain(&self.locations.browser_installs)
            .any(|path| path_exists(path))
    }

    fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    fn has_certificate(&self, root: &Root) -> bool {
        let record = trust_record_name(root);
        let databases = self.databases();
        !databases.is_empty()
            && databases
                .iter()
                .all(|database| self.has_record(database, &record))
    }

    fn install(&self, root_path: &Path, root: &Root) -> Result<(), CaError> {
        let record = trust_record_name(root);
        let databases = self.databases();
        if databases.is_empty() {
            return Err(CaError::backend(NAME, "no security database found"));
        }

        for database in &databases {
            let invocation = Invocation::new(CERTUTIL)
                .args([
                    "-A",
                    "-d",
                    database.as_str(),
                    "-t",
                    "C,,",
                    "-n",
                    record.as_str(),
                    "-i",
                ])
                .arg(root_path);
            self.run_certutil(&invocation, &format!("certutil -A -d {database}"))?;
        }

        if !self.has_certificate(root) {
            return Err(CaError::backend(
                NAME,
                format!("installing {record} failed; certutil does not list it"),
            ));
        }
        tracing::info!(databases = databases.len(), "installed root into NSS databases");
        Ok(())
    }

    fn uninstall(&self, _root_path: &Path, root: &Root) -> Result<(), CaError> {
        let record = trust_record_name(root);
        for database in self.databases() {
            if !self.has_record(&database, &record) {
                continue;
            }
            let invocation =
                Invocation::new(CERTUTIL).args(["-D", "-d", database.as_str(), "-n", record.as_str()]);
            self.run_certutil(&invocation, &format!("certutil -D -d {database}"))?;
        }
        Ok(())
    }
}
