//! Trust store integration: a closed set of backends behind [`TrustStore`],
//! discovered and driven together by [`TrustStores`].

use std::fmt;
use std::io;
use std::path::Path;

use crate::root::Root;
use crate::CaError;

mod java;
mod macos;
mod nss;
mod privilege;
mod registry;
mod runner;
#[cfg(test)]
pub(crate) mod testing;
mod unix;
mod windows;

pub use java::JavaKeystore;
pub use macos::MacKeychain;
pub use nss::{NssDatabases, NssLocations};
pub use privilege::PrivilegeHelper;
pub use registry::TrustStores;
pub use runner::{Invocation, SystemRunner, ToolOutput, ToolRunner};
pub use unix::{AnchorConvention, UnixAnchors};
pub use windows::WindowsRootStore;

pub const RECORD_NAME_PREFIX: &str = "localca development CA ";

/// One place a root can be trusted: a browser database, a keystore or an OS store.
///
/// Install and uninstall are idempotent. Presence is always queried from the
/// store itself.
pub trait TrustStore: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the store exists on this machine. Probes only, runs no tools.
    fn is_applicable(&self) -> bool;

    fn set_verbose(&mut self, verbose: bool);

    fn has_certificate(&self, root: &Root) -> bool;

    fn install(&self, root_path: &Path, root: &Root) -> Result<(), CaError>;

    fn uninstall(&self, root_path: &Path, root: &Root) -> Result<(), CaError>;
}

/// Record name for `root` in stores that key certificates by name.
pub fn trust_record_name(root: &Root) -> String {
    format!("{RECORD_NAME_PREFIX}{}", root.serial_decimal())
}

pub(crate) fn log_tool_output(verbose: bool, backend: &'static str, output: &ToolOutput) {
    let trimmed = output.output.trim();
    if trimmed.is_empty() {
        return;
    }
    if verbose {
        tracing::info!(backend, output = trimmed, "trust store tool output");
    } else {
        tracing::debug!(backend, output = trimmed, "trust store tool output");
    }
}

pub(crate) fn operation_error(
    backend: &'static str,
    operation: &str,
    detail: impl AsRef<str>,
) -> CaError {
    let detail = detail.as_ref().trim();
    if permission_denied_hint(detail) {
        return CaError::backend(
            backend,
            format!("{operation}: {detail} (administrator rights are required)"),
        );
    }
    CaError::backend(backend, format!("{operation}: {detail}"))
}

pub(crate) fn spawn_error(
    backend: &'static str,
    invocation: &Invocation,
    error: io::Error,
) -> CaError {
    if error.kind() == io::ErrorKind::NotFound {
        return CaError::backend(
            backend,
            format!("command '{}' not found", invocation.program_name()),
        );
    }
    operation_error(backend, &invocation.program_name(), error.to_string())
}

fn permission_denied_hint(detail: &str) -> bool {
    let lower = detail.to_ascii_lowercase();
    lower.contains("permission denied")
        || lower.contains("not permitted")
        || lower.contains("user interaction is not allowed")
        || lower.contains("access is denied")
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::{operation_error, spawn_error, Invocation};
    use crate::CaError;

    #[test]
    fn permission_failures_carry_hint() {
        match operation_error("Unix", "tee /etc/anchor", "tee: Permission denied\n") {
            CaError::Backend { backend, detail } => {
                assert_eq!(backend, "Unix");
                assert!(detail.starts_with("tee /etc/anchor: tee: Permission denied"));
                assert!(detail.contains("administrator rights"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_tool_is_named() {
        let error = spawn_error(
            "NSS",
            &Invocation::new("/usr/bin/certutil"),
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert_eq!(
            error.to_string(),
            "trust store NSS: command 'certutil' not found"
        );
    }
}
