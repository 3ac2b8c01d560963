use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use localca::CertificateAuthority;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use x509_parser::extensions::GeneralName;
use x509_parser::objects::{oid2sn, oid_registry};
use x509_parser::prelude::{parse_x509_certificate, X509Certificate};

pub(crate) fn run(authority: &CertificateAuthority, files: &[PathBuf]) -> Result<()> {
    let mut stdout = io::stdout().lock();
    for (index, file) in files.iter().enumerate() {
        if index > 0 {
            writeln!(stdout)?;
        }
        stdout.write_all(describe(authority, file)?.as_bytes())?;
    }
    Ok(())
}

/// Human readable summary of the first certificate in `file`.
pub(crate) fn describe(authority: &CertificateAuthority, file: &Path) -> Result<String> {
    let pem = fs::read(file).with_context(|| format!("read {}", file.display()))?;
    let der = CertificateDer::pem_slice_iter(&pem)
        .next()
        .ok_or_else(|| anyhow!("no certificates in {}", file.display()))?
        .map_err(|error| anyhow!("parse {}: {error:?}", file.display()))?;
    let (_, certificate) = parse_x509_certificate(der.as_ref())
        .map_err(|error| anyhow!("parse {}: {error}", file.display()))?;
    let names = AltNames::of(&certificate);

    let mut report = String::new();
    writeln!(report, "{}", file.display())?;
    writeln!(report, "\tSubject:    {}", certificate.subject())?;
    writeln!(
        report,
        "\tValid:      {} to {}",
        certificate.validity().not_before,
        certificate.validity().not_after
    )?;
    writeln!(report, "\tSerial:     {}", certificate.tbs_certificate.serial)?;
    writeln!(report, "\tAlgorithm:  {}", signature_algorithm(&certificate))?;
    writeln!(report, "\tDNSNames:   {}", names.dns.join(", "))?;
    writeln!(report, "\tIPs:        {}", names.ips.join(", "))?;
    writeln!(report, "\tEmails:     {}", names.emails.join(", "))?;
    writeln!(report, "\tURIs:       {}", names.uris.join(", "))?;
    if is_client_certificate(&certificate) {
        writeln!(report, "\tClientCert: true")?;
    }
    match authority.verify_leaf(der.as_ref()) {
        Ok(()) => {
            let root = authority.root()?;
            writeln!(report, "\tVerify:     Serial:  {}", root.serial_decimal())?;
            writeln!(report, "\t            Subject: {}", root.subject())?;
        }
        Err(error) => writeln!(report, "\tVerify:     {error}")?,
    }
    Ok(report)
}

#[derive(Debug, Default)]
struct AltNames {
    dns: Vec<String>,
    ips: Vec<String>,
    emails: Vec<String>,
    uris: Vec<String>,
}

impl AltNames {
    fn of(certificate: &X509Certificate<'_>) -> Self {
        let mut names = Self::default();
        let Ok(Some(extension)) = certificate.subject_alternative_name() else {
            return names;
        };
        for name in &extension.value.general_names {
            match name {
                GeneralName::DNSName(dns) => names.dns.push(dns.to_string()),
                GeneralName::RFC822Name(email) => names.emails.push(email.to_string()),
                GeneralName::URI(uri) => names.uris.push(uri.to_string()),
                GeneralName::IPAddress(bytes) => {
                    if let Some(ip) = ip_from_bytes(bytes) {
                        names.ips.push(ip.to_string());
                    }
                }
                _ => {}
            }
        }
        names
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    if let Ok(octets) = <[u8; 4]>::try_from(bytes) {
        return Some(IpAddr::from(octets));
    }
    <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from)
}

fn signature_algorithm(certificate: &X509Certificate<'_>) -> String {
    let oid = &certificate.signature_algorithm.algorithm;
    oid2sn(oid, oid_registry())
        .map(str::to_string)
        .unwrap_or_else(|_| oid.to_id_string())
}

fn is_client_certificate(certificate: &X509Certificate<'_>) -> bool {
    matches!(
        certificate.extended_key_usage(),
        Ok(Some(extension)) if extension.value.client_auth
    )
}
