use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyIdMethod,
    KeyPair, KeyUsagePurpose, SerialNumber,
};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use x509_parser::num_bigint::BigUint;
use zeroize::Zeroizing;

use crate::storage::RootPaths;
use crate::CaError;

pub const ROOT_ORGANIZATION: &str = "localca development CA";
pub const ROOT_COMMON_NAME_PREFIX: &str = "localca ";
pub const ROOT_VALIDITY_YEARS: i32 = 10;

/// Loaded root certificate and signing key.
pub struct Root {
    cert_pem: String,
    cert_der: CertificateDer<'static>,
    key_pem: Zeroizing<String>,
    issuer: Issuer<'static, KeyPair>,
    serial: BigUint,
    subject: String,
    subject_der: Vec<u8>,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
}

impl Root {
    /// Parse a certificate and key pair read from `paths`. Any parse failure or
    /// a key that does not match the certificate is reported as a corrupt store.
    pub(crate) fn from_pem(
        cert_pem: String,
        key_pem: Zeroizing<String>,
        paths: &RootPaths,
    ) -> Result<Self, CaError> {
        let corrupt_cert = |detail: String| CaError::CorruptStore {
            path: paths.cert.clone(),
            detail,
        };
        let corrupt_key = |detail: String| CaError::CorruptStore {
            path: paths.key.clone(),
            detail,
        };

        let cert_der = CertificateDer::from_pem_slice(cert_pem.as_bytes())
            .map_err(|error| corrupt_cert(format!("failed to read the CA certificate: {error}")))?;
        let key = KeyPair::from_pem(&key_pem)
            .map_err(|error| corrupt_key(format!("failed to read the CA key: {error}")))?;

        let (_, parsed) = x509_parser::parse_x509_certificate(cert_der.as_ref())
            .map_err(|error| corrupt_cert(format!("failed to parse the CA certificate: {error}")))?;
        if !parsed.is_ca() {
            return Err(corrupt_cert("certificate is not a CA".to_string()));
        }
        let certificate_key: &[u8] = &parsed.public_key().subject_public_key.data;
        if certificate_key != key.public_key_raw() {
            return Err(corrupt_key(
                "private key does not match the CA certificate".to_string(),
            ));
        }

        let serial = parsed.tbs_certificate.serial.clone();
        let subject = parsed.subject().to_string();
        let subject_der = parsed.subject().as_raw().to_vec();
        let not_before = parsed.validity().not_before.to_datetime();
        let not_after = parsed.validity().not_after.to_datetime();

        let issuer = Issuer::from_ca_cert_der(&cert_der, key).map_err(|error| {
            corrupt_cert(format!("failed to read issuer metadata: {error}"))
        })?;

        Ok(Self {
            cert_pem,
            cert_der,
            key_pem,
            issuer,
            serial,
            subject,
            subject_der,
            not_before,
            not_after,
        })
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

    pub fn serial(&self) -> &BigUint {
        &self.serial
    }

    pub fn serial_decimal(&self) -> String {
        self.serial.to_str_radix(10)
    }

    pub fn serial_hex(&self) -> String {
        self.serial.to_str_radix(16)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// DER encoding of the subject name, as it appears in issued leaves.
    pub fn subject_der(&self) -> &[u8] {
        &self.subject_der
    }

    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    pub fn sha1_fingerprint(&self) -> String {
        upper_hex(&Sha1::digest(self.cert_der.as_ref()))
    }

    pub fn sha256_fingerprint(&self) -> String {
        upper_hex(&Sha256::digest(self.cert_der.as_ref()))
    }

    pub(crate) fn issuer(&self) -> &Issuer<'static, KeyPair> {
        &self.issuer
    }
}

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Root")
            .field("subject", &self.subject)
            .field("serial", &self.serial_decimal())
            .field("not_after", &self.not_after)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Generate a self-signed root for `owner` and return its certificate and key PEM.
pub(crate) fn generate(owner: &str) -> Result<(String, Zeroizing<String>), CaError> {
    let key = KeyPair::generate()?;
    let now = OffsetDateTime::now_utc();

    let mut params = CertificateParams::default();
    params.serial_number = Some(random_serial());
    params.not_before = now;
    params.not_after = years_after(now, ROOT_VALIDITY_YEARS);
    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign];
    params.key_identifier_method =
        KeyIdMethod::PreSpecified(Sha1::digest(key.public_key_raw()).to_vec());

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::OrganizationName, ROOT_ORGANIZATION);
    distinguished_name.push(DnType::OrganizationalUnitName, owner);
    distinguished_name.push(
        DnType::CommonName,
        format!("{ROOT_COMMON_NAME_PREFIX}{owner}"),
    );
    params.distinguished_name = distinguished_name;

    let cert = params.self_signed(&key)?;
    Ok((cert.pem(), Zeroizing::new(key.serialize_pem())))
}

/// Write the key (0400) and certificate (0644) into `paths.dir` (0755).
pub(crate) fn persist(paths: &RootPaths, cert_pem: &str, key_pem: &str) -> Result<(), CaError> {
    create_root_dir(&paths.dir)?;
    write_with_mode(&paths.key, key_pem.as_bytes(), 0o400, "save CA key")?;
    write_with_mode(&paths.cert, cert_pem.as_bytes(), 0o644, "save CA certificate")?;
    Ok(())
}

fn create_root_dir(dir: &Path) -> Result<(), CaError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder
        .create(dir)
        .map_err(CaError::io(format!("create {}", dir.display())))
}

fn write_with_mode(path: &Path, contents: &[u8], mode: u32, operation: &str) -> Result<(), CaError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(path).map_err(CaError::io(operation))?;
    file.write_all(contents).map_err(CaError::io(operation))
}

/// Random 128-bit serial with a non-zero leading byte.
pub(crate) fn random_serial() -> SerialNumber {
    loop {
        let bytes: [u8; 16] = rand::random();
        if bytes[0] != 0 {
            return SerialNumber::from_slice(&bytes);
        }
    }
}

/// Same calendar date `years` later; Feb 29 rolls to Mar 1 in non-leap years.
pub(crate) fn years_after(start: OffsetDateTime, years: i32) -> OffsetDateTime {
    match start.replace_year(start.year() + years) {
        Ok(shifted) => shifted,
        Err(_) => {
            let next_day = start + time::Duration::days(1);
            next_day
                .replace_year(next_day.year() + years)
                .unwrap_or(next_day)
        }
    }
}

pub(crate) fn upper_hex(bytes: &[u8]) -> String {
    let mut rendered = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        rendered.push_str(&format!("{byte:02X}"));
    }
    rendered
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;
    use x509_parser::extensions::ParsedExtension;

    use super::{generate, upper_hex, years_after, Root, ROOT_ORGANIZATION};
    use crate::storage::RootPaths;
    use crate::CaError;

    fn fresh_root() -> Root {
        let (cert_pem, key_pem) = generate("dev@workstation").expect("generate root");
        Root::from_pem(cert_pem, key_pem, &RootPaths::in_dir("/unused")).expect("parse root")
    }

    #[test]
    fn generated_root_is_constrained_ca_valid_for_ten_years() {
        let root = fresh_root();
        let (_, parsed) =
            x509_parser::parse_x509_certificate(root.certificate_der().as_ref()).expect("parse");

        let constraints = parsed
            .basic_constraints()
            .expect("basic constraints")
            .expect("present");
        assert!(constraints.value.ca);
        assert_eq!(constraints.value.path_len_constraint, Some(0));

        let usage = parsed.key_usage().expect("key usage").expect("present");
        assert!(usage.value.key_cert_sign());
        assert!(!usage.value.digital_signature());

        let validity = parsed.validity();
        let lifetime = validity.not_after.to_datetime() - validity.not_before.to_datetime();
        assert!(lifetime.whole_days() >= 3652 && lifetime.whole_days() <= 3653);
    }

    #[test]
    fn generated_root_subject_names_owner() {
        let root = fresh_root();
        assert!(root.subject().contains(&format!("O={ROOT_ORGANIZATION}")));
        assert!(root.subject().contains("OU=dev@workstation"));
        assert!(root.subject().contains("CN=localca dev@workstation"));
    }

    #[test]
    fn subject_key_identifier_is_sha1_of_public_key() {
        use sha1::{Digest, Sha1};

        let root = fresh_root();
        let (_, parsed) =
            x509_parser::parse_x509_certificate(root.certificate_der().as_ref()).expect("parse");
        let public_key: &[u8] = &parsed.public_key().subject_public_key.data;
        let expected = Sha1::digest(public_key).to_vec();

        let ski = parsed
            .extensions()
            .iter()
            .find_map(|extension| match extension.parsed_extension() {
                ParsedExtension::SubjectKeyIdentifier(id) => Some(id.0.to_vec()),
                _ => None,
            })
            .expect("subject key identifier");
        assert_eq!(ski, expected);
    }

    #[test]
    fn serials_are_positive_and_distinct() {
        let first = fresh_root();
        let second = fresh_root();
        assert_ne!(first.serial(), second.serial());
        assert!(first.serial().bits() > 120);
    }

    #[test]
    fn mismatched_key_is_corrupt_store() {
        let (cert_pem, _) = generate("dev@workstation").expect("first root");
        let (_, other_key) = generate("dev@workstation").expect("second root");
        let paths = RootPaths::in_dir("/data/localca");

        match Root::from_pem(cert_pem, other_key, &paths).expect_err("mismatch must fail") {
            CaError::CorruptStore { path, detail } => {
                assert_eq!(path, paths.key);
                assert!(detail.contains("does not match"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn garbage_certificate_is_corrupt_store() {
        let (_, key_pem) = generate("dev@workstation").expect("root");
        let paths = RootPaths::in_dir("/data/localca");
        let error = Root::from_pem("not a pem".to_string(), key_pem, &paths)
            .expect_err("garbage must fail");
        match error {
            CaError::CorruptStore { path, .. } => assert_eq!(path, paths.cert),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn debug_output_redacts_private_key() {
        let root = fresh_root();
        let rendered = format!("{root:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("PRIVATE KEY"));
    }

    #[test]
    fn leap_day_rolls_forward() {
        assert_eq!(
            years_after(datetime!(2024-02-29 12:00 UTC), 1),
            datetime!(2025-03-01 12:00 UTC)
        );
        assert_eq!(
            years_after(datetime!(2024-05-10 08:30 UTC), 10),
            datetime!(2034-05-10 08:30 UTC)
        );
    }

    #[test]
    fn fingerprints_render_uppercase_hex() {
        assert_eq!(upper_hex(&[0x0a, 0xff, 0x10]), "0AFF10");
        let root = fresh_root();
        assert_eq!(root.sha1_fingerprint().len(), 40);
        assert_eq!(root.sha256_fingerprint().len(), 64);
    }
}
