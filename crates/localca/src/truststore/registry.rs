use std::path::Path;
use std::sync::Arc;

use crate::root::Root;
use crate::{BackendFailure, CaError};

use super::java::JavaKeystore;
use super::macos::MacKeychain;
use super::nss::{NssDatabases, NssLocations};
use super::privilege::PrivilegeHelper;
use super::unix::UnixAnchors;
use super::windows::WindowsRootStore;
use super::TrustStore;

/// The applicable trust stores, driven together.
#[derive(Debug)]
pub struct TrustStores {
    stores: Vec<Box<dyn TrustStore>>,
}

impl TrustStores {
    /// Probe NSS, Java, Unix anchors, the macOS keychain and the Windows
    /// store, in that order, keeping the applicable ones.
    pub fn discover(verbose: bool, privilege: Arc<PrivilegeHelper>) -> Self {
        let candidates: Vec<Box<dyn TrustStore>> = vec![
            Box::new(NssDatabases::new(
                Arc::clone(&privilege),
                NssLocations::from_env(),
            )),
            Box::new(JavaKeystore::from_env(Arc::clone(&privilege))),
            Box::new(UnixAnchors::detect(Arc::clone(&privilege))),
            Box::new(MacKeychain::new(privilege)),
            Box::new(WindowsRootStore::new()),
        ];
        let stores: Vec<Box<dyn TrustStore>> = candidates
            .into_iter()
            .filter(|store| store.is_applicable())
            .map(|mut store| {
                store.set_verbose(verbose);
                store
            })
            .collect();
        tracing::debug!(stores = ?stores.iter().map(|store| store.name()).collect::<Vec<_>>(), "discovered trust stores");
        Self { stores }
    }

    pub fn from_stores(stores: Vec<Box<dyn TrustStore>>) -> Self {
        Self { stores }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stores.iter().map(|store| store.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Per-store presence of `root`, in discovery order.
    pub fn presence(&self, root: &Root) -> Vec<(&'static str, bool)> {
        self.stores
            .iter()
            .map(|store| (store.name(), store.has_certificate(root)))
            .collect()
    }

    pub fn has_certificate_everywhere(&self, root: &Root) -> bool {
        !self.stores.is_empty() && self.stores.iter().all(|store| store.has_certificate(root))
    }

    pub fn install_all(&self, root_path: &Path, root: &Root) -> Result<(), CaError> {
        self.fan_out("install", |store| store.install(root_path, root))
    }

    pub fn uninstall_all(&self, root_path: &Path, root: &Root) -> Result<(), CaError> {
        self.fan_out("uninstall", |store| store.uninstall(root_path, root))
    }

    /// Run `operation` against every store; failures are collected, never short-circuited.
    fn fan_out<F>(&self, action: &str, operation: F) -> Result<(), CaError>
    where
        F: Fn(&dyn TrustStore) -> Result<(), CaError>,
    {
        if self.stores.is_empty() {
            return Err(CaError::NoTrustStore);
        }
        let mut failures = Vec::new();
        for store in &self.stores {
            match operation(store.as_ref()) {
                Ok(()) => tracing::debug!(backend = store.name(), action, "trust store updated"),
                Err(error) => {
                    tracing::warn!(backend = store.name(), action, %error, "trust store failed");
                    failures.push(BackendFailure {
                        backend: store.name(),
                        error,
                    });
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CaError::TrustStores(failures))
        }
    }
}
