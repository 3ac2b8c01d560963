use std::path::Path;
use std::sync::Arc;

use plist::{Dictionary, Value};

use crate::root::Root;
use crate::CaError;

use super::privilege::PrivilegeHelper;
use super::runner::{Invocation, ToolOutput};
use super::{log_tool_output, operation_error, spawn_error, TrustStore};

const NAME: &str = "macOS Keychain";
const SECURITY: &str = "security";
const SYSTEM_KEYCHAIN: &str = "/Library/Keychains/System.keychain";

/// Apple policy OIDs 1.2.840.113635.100.1.3 (sslServer) and .1.2 (basicX509).
const SSL_SERVER_POLICY: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x63, 0x64, 0x01, 0x03];
const BASIC_X509_POLICY: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x63, 0x64, 0x01, 0x02];
const TRUST_RESULT_TRUST_ROOT: u64 = 1;

/// The macOS System keychain, managed through `security`.
#[derive(Debug)]
pub struct MacKeychain {
    privilege: Arc<PrivilegeHelper>,
    verbose: bool,
}

impl MacKeychain {
    pub fn new(privilege: Arc<PrivilegeHelper>) -> Self {
        Self {
            privilege,
            verbose: false,
        }
    }

    fn security(&self, invocation: Invocation) -> Result<ToolOutput, CaError> {
        let output = self
            .privilege
            .run_escalated(&invocation)
            .map_err(|error| spawn_error(NAME, &invocation, error))?;
        log_tool_output(self.verbose, NAME, &output);
        Ok(output)
    }

    fn security_ok(&self, invocation: Invocation, operation: &str) -> Result<(), CaError> {
        let output = self.security(invocation)?;
        if !output.success {
            return Err(operation_error(NAME, operation, &output.output));
        }
        Ok(())
    }
}

impl TrustStore for MacKeychain {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_applicable(&self) -> bool {
        cfg!(target_os = "macos")
    }

    fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    fn has_certificate(&self, root: &Root) -> bool {
        let invocation =
            Invocation::new(SECURITY).args(["find-certificate", "-a", "-Z", SYSTEM_KEYCHAIN]);
        match self.privilege.run(&invocation) {
            Ok(output) if output.success => output.contains(&root.sha1_fingerprint()),
            _ => false,
        }
    }

    fn install(&self, root_path: &Path, root: &Root) -> Result<(), CaError> {
        self.security_ok(
            Invocation::new(SECURITY)
                .args(["add-trusted-cert", "-d", "-k", SYSTEM_KEYCHAIN])
                .arg(root_path),
            "security add-trusted-cert",
        )?;

        let settings_file = tempfile::Builder::new()
            .prefix("trust-settings")
            .suffix(".plist")
            .tempfile()
            .map_err(CaError::io("create trust settings file"))?;
        let settings_path = settings_file.path();

        self.security_ok(
            Invocation::new(SECURITY)
                .args(["trust-settings-export", "-d"])
                .arg(settings_path),
            "security trust-settings-export",
        )?;

        let mut document = Value::from_file(settings_path).map_err(|error| {
            CaError::backend(NAME, format!("failed to parse trust settings: {error}"))
        })?;
        patch_trust_settings(&mut document, root.subject_der())?;
        document.to_file_xml(settings_path).map_err(|error| {
            CaError::backend(NAME, format!("failed to write trust settings: {error}"))
        })?;

        self.security_ok(
            Invocation::new(SECURITY)
                .args(["trust-settings-import", "-d"])
                .arg(settings_path),
            "security trust-settings-import",
        )?;
        tracing::info!("installed root into the System keychain");
        Ok(())
    }

    fn uninstall(&self, root_path: &Path, _root: &Root) -> Result<(), CaError> {
        let output = self.security(
            Invocation::new(SECURITY)
                .args(["remove-trusted-cert", "-d"])
                .arg(root_path),
        )?;
        if output.success {
            return Ok(());
        }
        let lower = output.output.to_ascii_lowercase();
        if lower.contains("could not find") || lower.contains("not found") {
            return Ok(());
        }
        Err(operation_error(
            NAME,
            "security remove-trusted-cert",
            &output.output,
        ))
    }
}

/// Attach explicit sslServer and basicX509 trust to the `trustList` entry
/// whose `issuerName` equals `subject_der`.
pub(crate) fn patch_trust_settings(document: &mut Value, subject_der: &[u8]) -> Result<(), CaError> {
    let settings = document
        .as_dictionary_mut()
        .ok_or_else(|| CaError::backend(NAME, "trust settings are not a dictionary"))?;

    let version = settings
        .get("trustVersion")
        .and_then(Value::as_unsigned_integer);
    if version != Some(1) {
        return Err(CaError::backend(
            NAME,
            format!("unsupported trust settings version: {version:?}"),
        ));
    }

    let trust_list = settings
        .get_mut("trustList")
        .and_then(Value::as_dictionary_mut)
        .ok_or_else(|| CaError::backend(NAME, "trust settings have no trustList"))?;

    for entry in trust_list.values_mut() {
        let Some(entry) = entry.as_dictionary_mut() else {
            continue;
        };
        let matches = entry
            .get("issuerName")
            .and_then(Value::as_data)
            .is_some_and(|issuer| issuer == subject_der);
        if matches {
            entry.insert("trustSettings".to_string(), explicit_trust_settings());
            return Ok(());
        }
    }
    Err(CaError::backend(
        NAME,
        "the root is missing from the exported trust settings",
    ))
}

fn explicit_trust_settings() -> Value {
    let policy = |oid: &[u8], name: &str| {
        let mut entry = Dictionary::new();
        entry.insert(
            "kSecTrustSettingsPolicy".to_string(),
            Value::Data(oid.to_vec()),
        );
        entry.insert(
            "kSecTrustSettingsPolicyName".to_string(),
            Value::String(name.to_string()),
        );
        entry.insert(
            "kSecTrustSettingsResult".to_string(),
            Value::Integer(TRUST_RESULT_TRUST_ROOT.into()),
        );
        Value::Dictionary(entry)
    };
    Value::Array(vec![
        policy(SSL_SERVER_POLICY, "sslServer"),
        policy(BASIC_X509_POLICY, "basicX509"),
    ])
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use parking_lot::Mutex;
    use plist::{Dictionary, Value};

    use super::{patch_trust_settings, MacKeychain, BASIC_X509_POLICY, SSL_SERVER_POLICY};
    use crate::truststore::testing::{failed, ok, sample_root, ScriptedRunner};
    use crate::truststore::TrustStore;
    use crate::CaError;

    fn exported_settings(version: u64, issuers: &[&[u8]]) -> Value {
        let mut trust_list = Dictionary::new();
        for (index, issuer) in issuers.iter().enumerate() {
            let mut entry = Dictionary::new();
            entry.insert("issuerName".to_string(), Value::Data(issuer.to_vec()));
            entry.insert("serialNumber".to_string(), Value::Data(vec![index as u8 + 1]));
            trust_list.insert(format!("{:040X}", index), Value::Dictionary(entry));
        }
        let mut document = Dictionary::new();
        document.insert("trustVersion".to_string(), Value::Integer(version.into()));
        document.insert("trustList".to_string(), Value::Dictionary(trust_list));
        Value::Dictionary(document)
    }

    fn trust_settings_of<'a>(document: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
        document
            .as_dictionary()?
            .get("trustList")?
            .as_dictionary()?
            .get(key)?
            .as_dictionary()?
            .get("trustSettings")?
            .as_array()
    }

    #[test]
    fn patch_targets_matching_issuer_only() {
        let subject = b"0\x1e1\x1c0\x1a\x06\x03U\x04\x03\x0c\x13localca development";
        let mut document = exported_settings(1, &[b"someone else".as_slice(), subject.as_slice()]);
        patch_trust_settings(&mut document, subject).expect("patch");

        assert!(trust_settings_of(&document, &format!("{:040X}", 0)).is_none());
        let settings = trust_settings_of(&document, &format!("{:040X}", 1)).expect("patched");
        assert_eq!(settings.len(), 2);

        let first = settings[0].as_dictionary().expect("policy dict");
        assert_eq!(
            first.get("kSecTrustSettingsPolicy").and_then(Value::as_data),
            Some(SSL_SERVER_POLICY)
        );
        assert_eq!(
            first
                .get("kSecTrustSettingsPolicyName")
                .and_then(Value::as_string),
            Some("sslServer")
        );
        assert_eq!(
            first
                .get("kSecTrustSettingsResult")
                .and_then(Value::as_unsigned_integer),
            Some(1)
        );
        let second = settings[1].as_dictionary().expect("policy dict");
        assert_eq!(
            second.get("kSecTrustSettingsPolicy").and_then(Value::as_data),
            Some(BASIC_X509_POLICY)
        );
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut document = exported_settings(2, &[b"subject".as_slice()]);
        match patch_trust_settings(&mut document, b"subject").expect_err("version 2") {
            CaError::Backend { detail, .. } => assert!(detail.contains("version")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_entry_is_an_error() {
        let mut document = exported_settings(1, &[b"someone else".as_slice()]);
        match patch_trust_settings(&mut document, b"subject").expect_err("no entry") {
            CaError::Backend { detail, .. } => assert!(detail.contains("missing")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn install_round_trips_settings_through_security() {
        let root = sample_root();
        let subject = root.subject_der().to_vec();
        let imported: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let imported_by_tool = imported.clone();

        let (runner, helper) = ScriptedRunner::new()
            .privileged(true)
            .respond(move |invocation| {
                let verb = invocation.args[0].to_string_lossy().into_owned();
                let last = invocation.args.last().map(PathBuf::from);
                match (verb.as_str(), last) {
                    ("trust-settings-export", Some(path)) => {
                        let document = exported_settings(1, &[subject.as_slice()]);
                        match document.to_file_xml(&path) {
                            Ok(()) => ok(""),
                            Err(error) => failed(error.to_string()),
                        }
                    }
                    ("trust-settings-import", Some(path)) => match Value::from_file(&path) {
                        Ok(document) => {
                            *imported_by_tool.lock() = Some(document);
                            ok("")
                        }
                        Err(error) => failed(error.to_string()),
                    },
                    _ => ok(""),
                }
            })
            .into_helper();
        let store = MacKeychain::new(helper);

        store
            .install(Path::new("/data/localca/rootCA.pem"), &root)
            .expect("install");
        let rendered = runner.rendered();
        assert!(rendered[0].starts_with(
            "security add-trusted-cert -d -k /Library/Keychains/System.keychain"
        ));
        let document = imported.lock().clone().expect("settings imported");
        assert!(trust_settings_of(&document, &format!("{:040X}", 0)).is_some());
    }

    #[test]
    fn uninstall_tolerates_missing_certificate() {
        let root = sample_root();
        let (_, helper) = ScriptedRunner::new()
            .privileged(true)
            .respond(|_| failed("SecTrustSettingsRemoveTrustSettings: The specified item could not be found in the keychain."))
            .into_helper();
        let store = MacKeychain::new(helper);
        store
            .uninstall(Path::new("/data/localca/rootCA.pem"), &root)
            .expect("absent certificate is fine");
        store
            .uninstall(Path::new("/data/localca/rootCA.pem"), &root)
            .expect("still fine");
    }

    #[test]
    fn presence_is_read_from_keychain_hashes() {
        let root = sample_root();
        let listing = format!("SHA-256 hash: 00\nSHA-1 hash: {}\n", root.sha1_fingerprint());
        let (_, helper) = ScriptedRunner::new()
            .respond(move |_| ok(listing.clone()))
            .into_helper();
        let store = MacKeychain::new(helper);
        assert!(store.has_certificate(&root));
        assert!(!store.has_certificate(&sample_root()));
    }
}
