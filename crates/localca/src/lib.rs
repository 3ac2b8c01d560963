//! A local development certificate authority: one persistent root, leaf
//! issuance for servers and clients, and trust propagation into NSS, Java,
//! Unix anchors, the macOS keychain and the Windows root store.

mod authority;
mod config;
mod errors;
mod identifiers;
mod identity;
mod leaf;
mod root;
mod selector;
mod storage;
pub mod truststore;

pub use authority::{CertificateAuthority, Materialized};
pub use config::AuthorityConfig;
pub use errors::{BackendFailure, CaError};
pub use identifiers::SubjectName;
pub use leaf::{IssuedLeaf, LeafKind};
pub use root::Root;
pub use selector::CertificateSelector;
pub use storage::{
    root_dir_from, storage_location, HostOs, RootPaths, ENV_CAROOT, PRODUCT_DIR, ROOT_CERT_FILE,
    ROOT_KEY_FILE,
};
pub use truststore::{PrivilegeHelper, TrustStore, TrustStores};
