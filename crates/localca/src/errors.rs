use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaError {
    #[error("I/O error during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
    #[error("certificate generation failed: {0}")]
    Generation(String),
    #[error("root store at {} is corrupt: {detail}", .path.display())]
    CorruptStore { path: PathBuf, detail: String },
    #[error("root certificate authority is not available: {0}")]
    NotReady(String),
    #[error("can't find a location to store the root certificate; set CAROOT")]
    NoStorageLocation,
    #[error("invalid certificate identifiers: {0}")]
    InvalidIdentifiers(String),
    #[error("certificate verification failed: {0}")]
    Verification(String),
    #[error("no compatible trust stores found")]
    NoTrustStore,
    #[error("trust store {backend}: {detail}")]
    Backend { backend: &'static str, detail: String },
    #[error("{}", render_failures(.0))]
    TrustStores(Vec<BackendFailure>),
}

impl CaError {
    pub(crate) fn io(operation: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let operation = operation.into();
        move |source| Self::Io { operation, source }
    }

    pub(crate) fn backend(backend: &'static str, detail: impl Into<String>) -> Self {
        Self::Backend {
            backend,
            detail: detail.into(),
        }
    }

    /// Backend failures carried by a fan-out error; empty for every other kind.
    pub fn backend_failures(&self) -> &[BackendFailure] {
        match self {
            Self::TrustStores(failures) => failures,
            _ => &[],
        }
    }
}

impl From<rcgen::Error> for CaError {
    fn from(value: rcgen::Error) -> Self {
        Self::Generation(value.to_string())
    }
}

/// One trust store that failed during an install or uninstall fan-out.
#[derive(Debug)]
pub struct BackendFailure {
    pub backend: &'static str,
    pub error: CaError,
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.backend, self.error)
    }
}

fn render_failures(failures: &[BackendFailure]) -> String {
    let rendered: Vec<String> = failures.iter().map(ToString::to_string).collect();
    format!(
        "{} trust store(s) failed: {}",
        failures.len(),
        rendered.join("; ")
    )
}

#[cfg(test)]
mod tests {
    use super::{BackendFailure, CaError};

    #[test]
    fn trust_store_failures_render_every_backend() {
        let error = CaError::TrustStores(vec![
            BackendFailure {
                backend: "NSS",
                error: CaError::backend("NSS", "no security database found"),
            },
            BackendFailure {
                backend: "Java",
                error: CaError::backend("Java", "keytool exited with status 1"),
            },
        ]);

        let rendered = error.to_string();
        assert!(rendered.starts_with("2 trust store(s) failed"));
        assert!(rendered.contains("NSS: trust store NSS: no security database found"));
        assert!(rendered.contains("Java: trust store Java: keytool exited with status 1"));
        assert_eq!(error.backend_failures().len(), 2);
    }

    #[test]
    fn io_helper_keeps_operation_context() {
        let error = CaError::io("save CA key")(std::io::Error::other("disk full"));
        match error {
            CaError::Io { operation, source } => {
                assert_eq!(operation, "save CA key");
                assert_eq!(source.to_string(), "disk full");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
