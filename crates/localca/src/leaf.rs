use std::io::{self, Write};
use std::sync::Arc;

use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::sign::CertifiedKey;
use time::OffsetDateTime;
use zeroize::Zeroizing;

use crate::identifiers::SubjectName;
use crate::root::{random_serial, years_after, Root};
use crate::CaError;

pub const LEAF_ORGANIZATION: &str = "localca development certificate";
pub const LEAF_VALIDITY_YEARS: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeafKind {
    #[default]
    Server,
    Client,
}

/// A freshly signed leaf certificate and its private key.
pub struct IssuedLeaf {
    names: Vec<SubjectName>,
    cert_pem: String,
    cert_der: CertificateDer<'static>,
    key_pem: Zeroizing<String>,
    key_der: Zeroizing<Vec<u8>>,
}

impl IssuedLeaf {
    pub fn subject_names(&self) -> &[SubjectName] {
        &self.names
    }

    pub fn certificate_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn certificate_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    pub fn private_key_pem(&self) -> &str {
        &self.key_pem
    }

    pub fn private_key_der(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::from(PrivatePkcs8KeyDer::from(self.key_der.to_vec()))
    }

    /// Write the `PRIVATE KEY` block followed by the `CERTIFICATE` block.
    pub fn write_pem<W: Write + ?Sized>(&self, sink: &mut W) -> io::Result<()> {
        sink.write_all(self.key_pem.as_bytes())?;
        sink.write_all(self.cert_pem.as_bytes())?;
        sink.flush()
    }

    /// rustls signing material with the root appended to the chain.
    pub(crate) fn certified_key(&self, root: &Root) -> Result<CertifiedKey, CaError> {
        let signing_key = rustls::crypto::ring::sign::any_supported_type(&self.private_key_der())
            .map_err(|error| CaError::Generation(format!("unusable leaf key: {error}")))?;
        let chain = vec![self.cert_der.clone(), root.certificate_der().clone()];
        Ok(CertifiedKey::new(chain, signing_key))
    }
}

impl std::fmt::Debug for IssuedLeaf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedLeaf")
            .field("names", &self.names)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

pub(crate) fn issue<S: AsRef<str>>(
    root: &Root,
    owner: &str,
    identifiers: &[S],
    kind: LeafKind,
) -> Result<IssuedLeaf, CaError> {
    let Some(first) = identifiers.first() else {
        return Err(CaError::InvalidIdentifiers(
            "at least one name is required".to_string(),
        ));
    };
    if let Some(blank) = identifiers.iter().find(|id| id.as_ref().trim().is_empty()) {
        return Err(CaError::InvalidIdentifiers(format!(
            "blank name {:?}",
            blank.as_ref()
        )));
    }

    let names: Vec<SubjectName> = identifiers
        .iter()
        .map(|id| SubjectName::classify(id.as_ref()))
        .collect();
    let params = build_leaf_params(owner, first.as_ref(), &names, kind)?;

    let leaf_key = KeyPair::generate()?;
    let leaf_cert = params.signed_by(&leaf_key, root.issuer())?;

    tracing::debug!(names = ?names, kind = ?kind, "issued leaf certificate");
    Ok(IssuedLeaf {
        names,
        cert_pem: leaf_cert.pem(),
        cert_der: leaf_cert.der().clone(),
        key_pem: Zeroizing::new(leaf_key.serialize_pem()),
        key_der: Zeroizing::new(leaf_key.serialize_der()),
    })
}

/// Convenience wrapper so callers holding an `Arc<Root>` get a ready-to-serve key.
pub(crate) fn issue_certified<S: AsRef<str>>(
    root: &Root,
    owner: &str,
    identifiers: &[S],
    kind: LeafKind,
) -> Result<Arc<CertifiedKey>, CaError> {
    let leaf = issue(root, owner, identifiers, kind)?;
    Ok(Arc::new(leaf.certified_key(root)?))
}

fn build_leaf_params(
    owner: &str,
    first: &str,
    names: &[SubjectName],
    kind: LeafKind,
) -> Result<CertificateParams, CaError> {
    let now = OffsetDateTime::now_utc();
    let mut params = CertificateParams::default();
    params.serial_number = Some(random_serial());
    params.not_before = now;
    params.not_after = years_after(now, LEAF_VALIDITY_YEARS);
    params.is_ca = IsCa::ExplicitNoCa;
    params.use_authority_key_identifier_extension = true;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = extended_key_usages(names, kind);

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::OrganizationName, LEAF_ORGANIZATION);
    distinguished_name.push(DnType::OrganizationalUnitName, owner);
    if kind == LeafKind::Client {
        distinguished_name.push(DnType::CommonName, first);
    }
    params.distinguished_name = distinguished_name;

    params.subject_alt_names = names
        .iter()
        .map(SubjectName::to_san)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(params)
}

fn extended_key_usages(names: &[SubjectName], kind: LeafKind) -> Vec<ExtendedKeyUsagePurpose> {
    let mut usages = Vec::new();
    match kind {
        LeafKind::Client => {
            usages.push(ExtendedKeyUsagePurpose::ClientAuth);
            usages.push(ExtendedKeyUsagePurpose::ServerAuth);
        }
        LeafKind::Server if names.iter().any(SubjectName::is_ip_or_dns) => {
            usages.push(ExtendedKeyUsagePurpose::ServerAuth);
        }
        LeafKind::Server => {}
    }
    if names.iter().any(|name| matches!(name, SubjectName::Email(_))) {
        usages.push(ExtendedKeyUsagePurpose::CodeSigning);
        usages.push(ExtendedKeyUsagePurpose::EmailProtection);
    }
    usages
}
