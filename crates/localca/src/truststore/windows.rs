use std::path::Path;

use x509_parser::parse_x509_certificate;

use crate::root::Root;
use crate::CaError;

use super::TrustStore;

const NAME: &str = "Windows";

/// The current user's `ROOT` system store, driven through CryptoAPI.
#[derive(Debug, Default)]
pub struct WindowsRootStore {
    #[cfg_attr(not(windows), allow(dead_code))]
    verbose: bool,
}

impl WindowsRootStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Whether `der` parses as a certificate carrying the root's serial.
#[cfg_attr(not(windows), allow(dead_code))]
fn has_root_serial(der: &[u8], root: &Root) -> bool {
    match parse_x509_certificate(der) {
        Ok((_, certificate)) => certificate.tbs_certificate.serial == *root.serial(),
        Err(_) => false,
    }
}

impl TrustStore for WindowsRootStore {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_applicable(&self) -> bool {
        cfg!(windows)
    }

    fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    #[cfg(windows)]
    fn has_certificate(&self, root: &Root) -> bool {
        let found = native::RootStore::open()
            .and_then(|store| store.any(|der| has_root_serial(der, root)));
        match found {
            Ok(found) => found,
            Err(error) => {
                if self.verbose {
                    tracing::info!(%error, "failed to enumerate the Windows root store");
                } else {
                    tracing::debug!(%error, "failed to enumerate the Windows root store");
                }
                false
            }
        }
    }

    #[cfg(not(windows))]
    fn has_certificate(&self, _root: &Root) -> bool {
        false
    }

    #[cfg(windows)]
    fn install(&self, _root_path: &Path, root: &Root) -> Result<(), CaError> {
        let store = native::RootStore::open()
            .map_err(|error| CaError::backend(NAME, format!("open root store: {error}")))?;
        store
            .add_encoded(root.certificate_der().as_ref())
            .map_err(|error| CaError::backend(NAME, format!("add certificate: {error}")))?;
        tracing::info!("installed root into the Windows root store");
        Ok(())
    }

    #[cfg(not(windows))]
    fn install(&self, _root_path: &Path, _root: &Root) -> Result<(), CaError> {
        Err(CaError::backend(NAME, "only available on Windows"))
    }

    #[cfg(windows)]
    fn uninstall(&self, _root_path: &Path, root: &Root) -> Result<(), CaError> {
        let store = native::RootStore::open()
            .map_err(|error| CaError::backend(NAME, format!("open root store: {error}")))?;
        let deleted = store
            .delete_matching(|der| has_root_serial(der, root))
            .map_err(|error| CaError::backend(NAME, format!("delete certificate: {error}")))?;
        if deleted == 0 {
            tracing::warn!("no certificates with the root's serial were in the Windows root store");
        }
        Ok(())
    }

    #[cfg(not(windows))]
    fn uninstall(&self, _root_path: &Path, _root: &Root) -> Result<(), CaError> {
        Err(CaError::backend(NAME, "only available on Windows"))
    }
}

#[cfg(windows)]
mod native {
    use std::ffi::c_void;
    use std::io;
    use std::ptr;

    const X509_ASN_ENCODING: u32 = 0x1;
    const PKCS_7_ASN_ENCODING: u32 = 0x10000;
    const CERT_STORE_ADD_REPLACE_EXISTING: u32 = 3;
    const CRYPT_E_NOT_FOUND: u32 = 0x8009_2004;

    #[repr(C)]
    #[allow(dead_code)]
    struct CertContext {
        dw_cert_encoding_type: u32,
        pb_cert_encoded: *mut u8,
        cb_cert_encoded: u32,
        p_cert_info: *mut c_void,
        h_cert_store: *mut c_void,
    }

    #[link(name = "crypt32")]
    unsafe extern "system" {
        fn CertOpenSystemStoreW(h_prov: usize, subsystem_protocol: *const u16) -> *mut c_void;
        fn CertCloseStore(cert_store: *mut c_void, flags: u32) -> i32;
        fn CertAddEncodedCertificateToStore(
            cert_store: *mut c_void,
            encoding_type: u32,
            cert_encoded: *const u8,
            cert_encoded_len: u32,
            add_disposition: u32,
            stored_context: *mut *const CertContext,
        ) -> i32;
        fn CertEnumCertificatesInStore(
            cert_store: *mut c_void,
            prev_context: *const CertContext,
        ) -> *const CertContext;
        fn CertDuplicateCertificateContext(context: *const CertContext) -> *const CertContext;
        fn CertDeleteCertificateFromStore(context: *const CertContext) -> i32;
        fn CertFreeCertificateContext(context: *const CertContext) -> i32;
    }

    /// Open handle to the `ROOT` system store, closed on drop.
    pub(super) struct RootStore {
        handle: *mut c_void,
    }

    impl RootStore {
        pub(super) fn open() -> io::Result<Self> {
            let name: Vec<u16> = "ROOT".encode_utf16().chain(Some(0)).collect();
            // SAFETY: `name` is a NUL-terminated UTF-16 string alive for the call.
            let handle = unsafe { CertOpenSystemStoreW(0, name.as_ptr()) };
            if handle.is_null() {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { handle })
        }

        pub(super) fn add_encoded(&self, der: &[u8]) -> io::Result<()> {
            let len = u32::try_from(der.len())
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "certificate too large"))?;
            // SAFETY: store handle is open; `der` outlives the call; no context is requested.
            let added = unsafe {
                CertAddEncodedCertificateToStore(
                    self.handle,
                    X509_ASN_ENCODING | PKCS_7_ASN_ENCODING,
                    der.as_ptr(),
                    len,
                    CERT_STORE_ADD_REPLACE_EXISTING,
                    ptr::null_mut(),
                )
            };
            if added == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        pub(super) fn any(&self, matches: impl Fn(&[u8]) -> bool) -> io::Result<bool> {
            let mut found = false;
            self.walk(|context, der| {
                found = matches(der);
                if found {
                    // SAFETY: enumeration stops here, so the current context is ours to free.
                    unsafe { CertFreeCertificateContext(context) };
                }
                Ok(found)
            })?;
            Ok(found)
        }

        /// Delete every certificate `matches` accepts; returns how many went.
        pub(super) fn delete_matching(&self, matches: impl Fn(&[u8]) -> bool) -> io::Result<usize> {
            let mut deleted = 0;
            self.walk(|context, der| {
                if !matches(der) {
                    return Ok(false);
                }
                // SAFETY: deleting frees its argument, so delete a duplicate and keep
                // `context` valid for the next enumeration step.
                let removed = unsafe {
                    let duplicate = CertDuplicateCertificateContext(context);
                    CertDeleteCertificateFromStore(duplicate)
                };
                if removed == 0 {
                    let error = io::Error::last_os_error();
                    // SAFETY: enumeration is abandoned, release the current context.
                    unsafe { CertFreeCertificateContext(context) };
                    return Err(error);
                }
                deleted += 1;
                Ok(false)
            })?;
            Ok(deleted)
        }

        /// Visit each certificate; `visit` returns true to stop early, and then
        /// owns the current context.
        fn walk(
            &self,
            mut visit: impl FnMut(*const CertContext, &[u8]) -> io::Result<bool>,
        ) -> io::Result<()> {
            let mut context: *const CertContext = ptr::null();
            loop {
                // SAFETY: store handle is open; `context` is null or the previous
                // enumeration result, which this call releases.
                context = unsafe { CertEnumCertificatesInStore(self.handle, context) };
                if context.is_null() {
                    let error = io::Error::last_os_error();
                    if error.raw_os_error() == Some(CRYPT_E_NOT_FOUND as i32) {
                        return Ok(());
                    }
                    return Err(error);
                }
                // SAFETY: a non-null context points at a valid CERT_CONTEXT whose
                // encoded bytes stay alive until the next enumeration call.
                let der = unsafe {
                    let context = &*context;
                    std::slice::from_raw_parts(
                        context.pb_cert_encoded,
                        context.cb_cert_encoded as usize,
                    )
                };
                if visit(context, der)? {
                    return Ok(());
                }
            }
        }
    }

    impl Drop for RootStore {
        fn drop(&mut self) {
            // SAFETY: handle came from CertOpenSystemStoreW and is closed once.
            unsafe { CertCloseStore(self.handle, 0) };
        }
    }
}
