use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustls::sign::CertifiedKey;
use tracing::{debug, info};
use x509_parser::prelude::parse_x509_certificate;
use zeroize::Zeroizing;

use crate::config::AuthorityConfig;
use crate::identity::user_and_hostname;
use crate::leaf::{self, IssuedLeaf, LeafKind};
use crate::root::{self, Root};
use crate::selector::CertificateSelector;
use crate::storage::RootPaths;
use crate::truststore::{PrivilegeHelper, TrustStores};
use crate::CaError;

/// Outcome of [`CertificateAuthority::materialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    Created,
    Loaded,
}

/// Root certificate lifecycle, leaf issuance and trust propagation.
///
/// The authority is shared through an `Arc` with TLS servers using
/// [`CertificateAuthority::certificate_selector`]; every method takes `&self`.
pub struct CertificateAuthority {
    config: AuthorityConfig,
    owner: String,
    root: RwLock<Option<Arc<Root>>>,
    leaf_cache: Mutex<HashMap<String, Arc<CertifiedKey>>>,
    privilege: Arc<PrivilegeHelper>,
}

impl CertificateAuthority {
    pub fn new(config: AuthorityConfig) -> Result<Self, CaError> {
        Self::with_privilege(config, PrivilegeHelper::system())
    }

    /// Authority whose trust-store tools run through `privilege`.
    pub fn with_privilege(
        config: AuthorityConfig,
        privilege: PrivilegeHelper,
    ) -> Result<Self, CaError> {
        config.validate()?;
        Ok(Self {
            config,
            owner: user_and_hostname(),
            root: RwLock::new(None),
            leaf_cache: Mutex::new(HashMap::new()),
            privilege: Arc::new(privilege),
        })
    }

    pub fn from_env() -> Result<Self, CaError> {
        Self::new(AuthorityConfig::from_env())
    }

    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    /// Directory holding the root, if one could be resolved.
    pub fn storage_location(&self) -> Option<&Path> {
        self.config.root_dir.as_deref()
    }

    pub fn paths(&self) -> Result<RootPaths, CaError> {
        self.config.root_paths().ok_or(CaError::NoStorageLocation)
    }

    /// Whether a root certificate exists on disk.
    pub fn exists(&self) -> bool {
        self.config
            .root_paths()
            .is_some_and(|paths| paths.cert_exists())
    }

    /// Load the root if one is on disk, otherwise generate and persist a new one.
    pub fn materialize(&self) -> Result<Materialized, CaError> {
        let paths = self.paths()?;
        if !paths.cert_exists() && !paths.key_exists() {
            self.create()?;
            return Ok(Materialized::Created);
        }
        self.load()?;
        Ok(Materialized::Loaded)
    }

    /// Generate a new root. Fails if either root file already exists.
    pub fn create(&self) -> Result<Arc<Root>, CaError> {
        let paths = self.paths()?;
        if paths.cert_exists() || paths.key_exists() {
            return Err(CaError::Io {
                operation: "create root".to_string(),
                source: io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("a root already exists in {}", paths.dir.display()),
                ),
            });
        }

        let (cert_pem, key_pem) = root::generate(&self.owner)?;
        root::persist(&paths, &cert_pem, &key_pem)?;
        let root = Arc::new(Root::from_pem(cert_pem, key_pem, &paths)?);
        info!(
            dir = %paths.dir.display(),
            serial = %root.serial_decimal(),
            "created a new local CA"
        );
        self.replace_root(Some(Arc::clone(&root)));
        Ok(root)
    }

    /// Load the root from disk. `NotReady` when neither file exists.
    pub fn load(&self) -> Result<Arc<Root>, CaError> {
        let paths = self.paths()?;
        match (paths.cert_exists(), paths.key_exists()) {
            (false, false) => {
                return Err(CaError::NotReady(format!(
                    "no root certificate in {}",
                    paths.dir.display()
                )))
            }
            (true, false) => {
                return Err(CaError::CorruptStore {
                    path: paths.key.clone(),
                    detail: "the CA key is missing".to_string(),
                })
            }
            (false, true) => {
                return Err(CaError::CorruptStore {
                    path: paths.cert.clone(),
                    detail: "the CA certificate is missing".to_string(),
                })
            }
            (true, true) => {}
        }

        let cert_pem = read_utf8(&paths.cert, "read CA certificate")?;
        let key_pem = Zeroizing::new(read_utf8(&paths.key, "read CA key")?);
        let root = Arc::new(Root::from_pem(cert_pem, key_pem, &paths)?);
        info!(
            dir = %paths.dir.display(),
            serial = %root.serial_decimal(),
            "loaded local CA"
        );
        self.replace_root(Some(Arc::clone(&root)));
        Ok(root)
    }

    /// Remove the certificate, the key and their directory. Nothing on disk is a no-op.
    pub fn delete(&self) -> Result<(), CaError> {
        let paths = self.paths()?;
        remove_if_present(&paths.cert, "remove CA certificate")?;
        remove_if_present(&paths.key, "remove CA key")?;
        match fs::remove_dir(&paths.dir) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => {
                return Err(CaError::io(format!("remove {}", paths.dir.display()))(error))
            }
        }
        self.replace_root(None);
        info!(dir = %paths.dir.display(), "deleted local CA");
        Ok(())
    }

    /// The loaded root, loading it from disk on first use.
    pub fn root(&self) -> Result<Arc<Root>, CaError> {
        if let Some(root) = self.root.read().as_ref() {
            return Ok(Arc::clone(root));
        }
        self.load()
    }

    /// Sign a leaf for `identifiers`; the first one becomes the client CN.
    pub fn issue<S: AsRef<str>>(
        &self,
        identifiers: &[S],
        kind: LeafKind,
    ) -> Result<IssuedLeaf, CaError> {
        let root = self.root()?;
        leaf::issue(&root, &self.owner, identifiers, kind)
    }

    /// Issue a leaf and write it to `sink` as PEM, key first.
    pub fn write_leaf<S: AsRef<str>, W: Write + ?Sized>(
        &self,
        sink: &mut W,
        identifiers: &[S],
        kind: LeafKind,
    ) -> Result<IssuedLeaf, CaError> {
        let leaf = self.issue(identifiers, kind)?;
        leaf.write_pem(sink)
            .map_err(CaError::io("write leaf certificate"))?;
        Ok(leaf)
    }

    /// Cached server certificate for `server_name`, issued on first request.
    ///
    /// The cache lock is held across lookup, issuance and insert, so each name
    /// is issued at most once.
    pub fn server_certificate(&self, server_name: &str) -> Result<Arc<CertifiedKey>, CaError> {
        let root = self.root()?;
        let key = server_name.to_ascii_lowercase();
        let mut cache = self.leaf_cache.lock();
        if let Some(cached) = cache.get(&key) {
            return Ok(Arc::clone(cached));
        }

        let certified = leaf::issue_certified(&root, &self.owner, &[server_name], LeafKind::Server)?;
        cache.insert(key, Arc::clone(&certified));
        Ok(certified)
    }

    pub fn certificate_selector(self: &Arc<Self>) -> CertificateSelector {
        CertificateSelector::new(Arc::clone(self))
    }

    /// Check that `leaf_der` was signed by this root and is currently valid.
    pub fn verify_leaf(&self, leaf_der: &[u8]) -> Result<(), CaError> {
        let root = self.root()?;
        let (_, root_cert) = parse_x509_certificate(root.certificate_der().as_ref())
            .map_err(|error| CaError::Verification(format!("unreadable root: {error}")))?;
        let (_, leaf_cert) = parse_x509_certificate(leaf_der)
            .map_err(|error| CaError::Verification(format!("unreadable certificate: {error}")))?;

        if leaf_cert.issuer().as_raw() != root.subject_der() {
            return Err(CaError::Verification(format!(
                "issued by {}, not by the local CA",
                leaf_cert.issuer()
            )));
        }
        leaf_cert
            .verify_signature(Some(root_cert.public_key()))
            .map_err(|error| CaError::Verification(format!("bad signature: {error}")))?;
        if !leaf_cert.validity().is_valid() {
            return Err(CaError::Verification(
                "outside its validity period".to_string(),
            ));
        }
        Ok(())
    }

    /// Trust stores applicable on this machine.
    pub fn trust_stores(&self) -> TrustStores {
        TrustStores::discover(self.config.verbose, Arc::clone(&self.privilege))
    }

    pub fn install_trust(&self) -> Result<(), CaError> {
        let root = self.root()?;
        let paths = self.paths()?;
        self.trust_stores().install_all(&paths.cert, &root)
    }

    pub fn uninstall_trust(&self) -> Result<(), CaError> {
        let root = self.root()?;
        let paths = self.paths()?;
        self.trust_stores().uninstall_all(&paths.cert, &root)
    }

    fn replace_root(&self, next: Option<Arc<Root>>) {
        *self.root.write() = next;
        let dropped = {
            let mut cache = self.leaf_cache.lock();
            let count = cache.len();
            cache.clear();
            count
        };
        if dropped > 0 {
            debug!(dropped, "root changed; cleared cached server certificates");
        }
    }
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("config", &self.config)
            .field("owner", &self.owner)
            .field("root", &*self.root.read())
            .field("cached_leaves", &self.leaf_cache.lock().len())
            .finish()
    }
}

fn read_utf8(path: &Path, operation: &str) -> Result<String, CaError> {
    let bytes = fs::read(path).map_err(CaError::io(operation))?;
    String::from_utf8(bytes).map_err(|_| CaError::CorruptStore {
        path: path.to_path_buf(),
        detail: "file is not valid PEM text".to_string(),
    })
}

fn remove_if_present(path: &Path, operation: &str) -> Result<(), CaError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(CaError::io(operation)(error)),
    }
}
