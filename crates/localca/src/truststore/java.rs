use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::root::Root;
use crate::storage::path_exists;
use crate::CaError;

use super::privilege::PrivilegeHelper;
use super::runner::{Invocation, ToolOutput};
use super::{log_tool_output, operation_error, spawn_error, trust_record_name, TrustStore};

const NAME: &str = "Java";
const STORE_PASSWORD: &str = "changeit";
const FILE_NOT_FOUND_MARKER: &str = "java.io.FileNotFoundException";
const ALIAS_MISSING_MARKER: &str = "does not exist";

/// The `cacerts` keystore of the JDK at `JAVA_HOME`, managed through `keytool`.
#[derive(Debug)]
pub struct JavaKeystore {
    privilege: Arc<PrivilegeHelper>,
    java_home: Option<PathBuf>,
    verbose: bool,
}

impl JavaKeystore {
    pub fn new(privilege: Arc<PrivilegeHelper>, java_home: Option<PathBuf>) -> Self {
        Self {
            privilege,
            java_home,
            verbose: false,
        }
    }

    pub fn from_env(privilege: Arc<PrivilegeHelper>) -> Self {
        let java_home = std::env::var_os("JAVA_HOME")
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        Self::new(privilege, java_home)
    }

    pub fn keytool(&self) -> Option<PathBuf> {
        let program = if cfg!(windows) { "keytool.exe" } else { "keytool" };
        self.java_home
            .as_ref()
            .map(|home| home.join("bin").join(program))
    }

    /// `lib/security/cacerts`, or the pre-9 `jre/lib/security/cacerts`.
    pub fn cacerts(&self) -> Option<PathBuf> {
        let home = self.java_home.as_ref()?;
        [
            home.join("lib").join("security").join("cacerts"),
            home.join("jre").join("lib").join("security").join("cacerts"),
        ]
        .into_iter()
        .find(|candidate| path_exists(candidate))
    }

    fn keytool_invocation(&self, keytool: &Path) -> Invocation {
        let invocation = Invocation::new(keytool);
        match &self.java_home {
            Some(home) => invocation.env("JAVA_HOME", home),
            None => invocation,
        }
    }

    fn tool_and_keystore(&self) -> Result<(PathBuf, PathBuf), CaError> {
        let keytool = self
            .keytool()
            .filter(|keytool| path_exists(keytool))
            .ok_or_else(|| CaError::backend(NAME, "keytool not found under JAVA_HOME"))?;
        let cacerts = self
            .cacerts()
            .ok_or_else(|| CaError::backend(NAME, "no cacerts keystore under JAVA_HOME"))?;
        Ok((keytool, cacerts))
    }

    fn run_keytool(&self, invocation: &Invocation) -> Result<ToolOutput, CaError> {
        let output = self
            .privilege
            .run_with_retry(invocation, FILE_NOT_FOUND_MARKER)
            .map_err(|error| spawn_error(NAME, invocation, error))?;
        log_tool_output(self.verbose, NAME, &output);
        Ok(output)
    }

    fn delete_alias(&self, keytool: &Path, cacerts: &Path, alias: &str) -> Result<(), CaError> {
        let invocation = self
            .keytool_invocation(keytool)
            .args(["-delete", "-alias", alias, "-keystore"])
            .arg(cacerts)
            .args(["-storepass", STORE_PASSWORD]);
        let output = self.run_keytool(&invocation)?;
        if output.success || output.contains(ALIAS_MISSING_MARKER) {
            return Ok(());
        }
        Err(operation_error(NAME, "keytool -delete", &output.output))
    }
}

/// Whether `listing` mentions `fingerprint`, ignoring keytool's `:` separators.
fn listing_has_fingerprint(listing: &str, fingerprint: &str) -> bool {
    listing.replace(':', "").contains(fingerprint)
}

impl TrustStore for JavaKeystore {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_applicable(&self) -> bool {
        self.keytool().is_some_and(|keytool| path_exists(&keytool))
    }

    fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    fn has_certificate(&self, root: &Root) -> bool {
        let Ok((keytool, cacerts)) = self.tool_and_keystore() else {
            return false;
        };
        let invocation = self
            .keytool_invocation(&keytool)
            .args(["-list", "-keystore"])
            .arg(&cacerts)
            .args(["-storepass", STORE_PASSWORD]);
        match self.privilege.run(&invocation) {
            Ok(output) if output.success => {
                listing_has_fingerprint(&output.output, &root.sha1_fingerprint())
                    || listing_has_fingerprint(&output.output, &root.sha256_fingerprint())
            }
            _ => false,
        }
    }

    fn install(&self, root_path: &Path, root: &Root) -> Result<(), CaError> {
        let (keytool, cacerts) = self.tool_and_keystore()?;
        let alias = trust_record_name(root);
        self.delete_alias(&keytool, &cacerts, &alias)?;

        let invocation = self
            .keytool_invocation(&keytool)
            .args(["-importcert", "-noprompt", "-keystore"])
            .arg(&cacerts)
            .args(["-storepass", STORE_PASSWORD, "-file"])
            .arg(root_path)
            .args(["-alias", alias.as_str()]);
        let output = self.run_keytool(&invocation)?;
        if !output.success {
            return Err(operation_error(NAME, "keytool -importcert", &output.output));
        }
        tracing::info!(keystore = %cacerts.display(), "installed root into Java keystore");
        Ok(())
    }

    fn uninstall(&self, _root_path: &Path, root: &Root) -> Result<(), CaError> {
        let (keytool, cacerts) = self.tool_and_keystore()?;
        self.delete_alias(&keytool, &cacerts, &trust_record_name(root))
    }
}
