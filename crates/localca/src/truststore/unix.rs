use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;

use crate::root::Root;
use crate::storage::path_exists;
use crate::CaError;

use super::privilege::PrivilegeHelper;
use super::runner::Invocation;
use super::{log_tool_output, operation_error, spawn_error, trust_record_name, TrustStore};

const NAME: &str = "Unix";

/// Known anchor directories, in the order they are probed.
const CONVENTIONS: &[(&str, &str, &[&str])] = &[
    (
        "/etc/pki/ca-trust/source/anchors/",
        "pem",
        &["update-ca-trust", "extract"],
    ),
    (
        "/usr/local/share/ca-certificates/",
        "crt",
        &["update-ca-certificates"],
    ),
    (
        "/etc/ca-certificates/trust-source/anchors/",
        "crt",
        &["trust", "extract-compat"],
    ),
    (
        "/usr/share/pki/trust/anchors",
        "pem",
        &["update-ca-certificates"],
    ),
    (
        "/usr/share/ca-certificates/mozilla",
        "crt",
        &["update-ca-certificates"],
    ),
];

/// A distribution's anchor directory, file extension and refresh command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorConvention {
    pub dir: PathBuf,
    pub extension: String,
    pub refresh: Vec<String>,
}

impl AnchorConvention {
    pub fn new(dir: impl Into<PathBuf>, extension: &str, refresh: &[&str]) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.to_string(),
            refresh: refresh.iter().map(|part| part.to_string()).collect(),
        }
    }

    /// First known convention whose directory exists according to `exists`.
    pub fn detect(exists: impl Fn(&Path) -> bool) -> Option<Self> {
        CONVENTIONS
            .iter()
            .find(|(dir, _, _)| exists(Path::new(dir)))
            .map(|(dir, extension, refresh)| Self::new(dir, extension, refresh))
    }

    pub fn anchor_path(&self, root: &Root) -> PathBuf {
        let file_name = trust_record_name(root).replace(' ', "_");
        self.dir.join(format!("{file_name}.{}", self.extension))
    }

    fn refresh_invocation(&self) -> Option<Invocation> {
        let (program, args) = self.refresh.split_first()?;
        Some(Invocation::new(program).args(args))
    }
}

/// The system-wide anchor directory of Linux and BSD distributions.
#[derive(Debug)]
pub struct UnixAnchors {
    privilege: Arc<PrivilegeHelper>,
    convention: Option<AnchorConvention>,
    verbose: bool,
}

impl UnixAnchors {
    pub fn new(privilege: Arc<PrivilegeHelper>, convention: Option<AnchorConvention>) -> Self {
        Self {
            privilege,
            convention,
            verbose: false,
        }
    }

    pub fn detect(privilege: Arc<PrivilegeHelper>) -> Self {
        Self::new(privilege, AnchorConvention::detect(path_exists))
    }

    pub fn convention(&self) -> Option<&AnchorConvention> {
        self.convention.as_ref()
    }

    fn run_escalated(&self, invocation: Invocation, operation: &str) -> Result<(), CaError> {
        let output = self
            .privilege
            .run_escalated(&invocation)
            .map_err(|error| spawn_error(NAME, &invocation, error))?;
        log_tool_output(self.verbose, NAME, &output);
        if !output.success {
            return Err(operation_error(NAME, operation, &output.output));
        }
        Ok(())
    }

    fn refresh(&self, convention: &AnchorConvention) -> Result<(), CaError> {
        match convention.refresh_invocation() {
            Some(invocation) => {
                let operation = convention.refresh.join(" ");
                self.run_escalated(invocation, &operation)
            }
            None => Ok(()),
        }
    }
}

impl TrustStore for UnixAnchors {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_applicable(&self) -> bool {
        cfg!(all(unix, not(target_os = "macos")))
    }

    fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    fn has_certificate(&self, root: &Root) -> bool {
        let Some(convention) = &self.convention else {
            return false;
        };
        let Ok(contents) = fs::read(convention.anchor_path(root)) else {
            return false;
        };
        CertificateDer::pem_slice_iter(&contents)
            .filter_map(Result::ok)
            .any(|certificate| certificate.as_ref() == root.certificate_der().as_ref())
    }

    fn install(&self, root_path: &Path, root: &Root) -> Result<(), CaError> {
        let Some(convention) = &self.convention else {
            tracing::warn!(
                "installing into the system store is not supported on this distribution; \
                 browsers using NSS will still trust the root"
            );
            return Ok(());
        };

        let pem = fs::read(root_path).map_err(CaError::io(format!(
            "read root certificate {}",
            root_path.display()
        )))?;
        let anchor = convention.anchor_path(root);
        self.run_escalated(
            Invocation::new("tee").arg(&anchor).stdin(pem),
            &format!("tee {}", anchor.display()),
        )?;
        self.refresh(convention)?;
        tracing::info!(anchor = %anchor.display(), "installed root into system trust anchors");
        Ok(())
    }

    fn uninstall(&self, _root_path: &Path, root: &Root) -> Result<(), CaError> {
        let Some(convention) = &self.convention else {
            return Ok(());
        };
        let anchor = convention.anchor_path(root);
        self.run_escalated(
            Invocation::new("rm").arg("-f").arg(&anchor),
            &format!("rm -f {}", anchor.display()),
        )?;
        self.refresh(convention)
    }
}
