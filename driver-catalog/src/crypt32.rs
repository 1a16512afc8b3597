//! The crypt32 catalog query, used on Windows.

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::marker::PhantomData;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use tracing::debug;
use windows_sys::Win32::Security::Cryptography::{
    CertCloseStore, CertFreeCRLContext, CertFreeCTLContext, CertFreeCertificateContext,
    CryptMsgClose, CryptQueryObject, CERT_CONTEXT, CRL_CONTEXT, CTL_CONTEXT, HCERTSTORE,
};

use crate::layout::{CtlLayout, NativeMemory};
use crate::native::{read_ctl_extensions, RawExtension};
use crate::query::{CatalogQuery, CtlHandle};
use crate::CatalogError;

const CERT_QUERY_OBJECT_FILE: u32 = 0x1;
const CERT_QUERY_CONTENT_FLAG_ALL: u32 = 0x3FFF;
const CERT_QUERY_FORMAT_FLAG_ALL: u32 = 0xE;

// dwContentType values that come with a context in ppvContext.
const CERT_QUERY_CONTENT_CERT: u32 = 1;
const CERT_QUERY_CONTENT_CTL: u32 = 2;
const CERT_QUERY_CONTENT_CRL: u32 = 3;
const CERT_QUERY_CONTENT_SERIALIZED_CERT: u32 = 5;
const CERT_QUERY_CONTENT_SERIALIZED_CTL: u32 = 6;
const CERT_QUERY_CONTENT_SERIALIZED_CRL: u32 = 7;

/// Opens catalogs through `CryptQueryObject`.
#[derive(Clone, Copy, Debug)]
pub struct Crypt32 {
    layout: &'static CtlLayout,
}

impl Crypt32 {
    /// A query using the host's native structure layout.
    pub fn new() -> Self {
        Crypt32 {
            layout: CtlLayout::host(),
        }
    }
}

impl Default for Crypt32 {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogQuery for Crypt32 {
    fn open(&self, path: &Path) -> Result<Box<dyn CtlHandle>, CatalogError> {
        let wide: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        let mut encoding = 0u32;
        let mut content_type = 0u32;
        let mut format = 0u32;
        let mut store: HCERTSTORE = ptr::null_mut();
        let mut msg: *mut c_void = ptr::null_mut();
        let mut context: *mut c_void = ptr::null_mut();

        // SAFETY: `wide` is NUL-terminated and outlives the call; every out
        // pointer refers to a live local.
        let ok = unsafe {
            CryptQueryObject(
                CERT_QUERY_OBJECT_FILE,
                wide.as_ptr() as *const c_void,
                CERT_QUERY_CONTENT_FLAG_ALL,
                CERT_QUERY_FORMAT_FLAG_ALL,
                0,
                &mut encoding,
                &mut content_type,
                &mut format,
                &mut store,
                &mut msg,
                &mut context,
            )
        };

        if ok == 0 {
            return Err(CatalogError::Open {
                path: path.display().to_string(),
                reason: std::io::Error::last_os_error().to_string(),
            });
        }

        // Own whatever came back before deciding anything, so Drop cleans up.
        let handle = Crypt32Handle {
            context: QueriedContext::new(content_type, context),
            store,
            msg,
            layout: self.layout,
        };

        if !matches!(handle.context, QueriedContext::Ctl(_)) {
            return Err(CatalogError::Open {
                path: path.display().to_string(),
                reason: format!("not a catalog (content type {content_type})"),
            });
        }

        debug!(
            path = %path.display(),
            encoding, content_type, format, "opened catalog"
        );
        Ok(Box::new(handle))
    }
}

/// The context `CryptQueryObject` returned, tagged by how it must be freed.
#[derive(Clone, Copy)]
enum QueriedContext {
    Ctl(*const CTL_CONTEXT),
    Cert(*const CERT_CONTEXT),
    Crl(*const CRL_CONTEXT),
    None,
}

impl QueriedContext {
    fn new(content_type: u32, context: *mut c_void) -> Self {
        if context.is_null() {
            return QueriedContext::None;
        }
        match content_type {
            CERT_QUERY_CONTENT_CTL | CERT_QUERY_CONTENT_SERIALIZED_CTL => {
                QueriedContext::Ctl(context as *const CTL_CONTEXT)
            }
            CERT_QUERY_CONTENT_CERT | CERT_QUERY_CONTENT_SERIALIZED_CERT => {
                QueriedContext::Cert(context as *const CERT_CONTEXT)
            }
            CERT_QUERY_CONTENT_CRL | CERT_QUERY_CONTENT_SERIALIZED_CRL => {
                QueriedContext::Crl(context as *const CRL_CONTEXT)
            }
            _ => QueriedContext::None,
        }
    }
}

/// Everything `CryptQueryObject` handed back, released on drop.
struct Crypt32Handle {
    context: QueriedContext,
    store: HCERTSTORE,
    msg: *mut c_void,
    layout: &'static CtlLayout,
}

impl CtlHandle for Crypt32Handle {
    fn extensions(&self) -> Result<Vec<RawExtension>, CatalogError> {
        let QueriedContext::Ctl(ctl) = self.context else {
            return Err(CatalogError::NoCtlInfo);
        };
        let mem = ProcessMemory {
            _handle: PhantomData,
        };
        read_ctl_extensions(&mem, self.layout, ctl as u64)
    }
}

impl Drop for Crypt32Handle {
    fn drop(&mut self) {
        // SAFETY: each handle was produced by CryptQueryObject and is released
        // exactly once, here.
        unsafe {
            match self.context {
                QueriedContext::Ctl(ctl) => {
                    CertFreeCTLContext(ctl);
                }
                QueriedContext::Cert(cert) => {
                    CertFreeCertificateContext(cert);
                }
                QueriedContext::Crl(crl) => {
                    CertFreeCRLContext(crl);
                }
                QueriedContext::None => {}
            }
            if !self.store.is_null() {
                CertCloseStore(self.store, 0);
            }
            if !self.msg.is_null() {
                CryptMsgClose(self.msg);
            }
        }
    }
}

/// The current address space, borrowed for as long as a handle keeps the
/// CTL alive.
struct ProcessMemory<'a> {
    _handle: PhantomData<&'a Crypt32Handle>,
}

impl NativeMemory for ProcessMemory<'_> {
    fn read(&self, addr: u64, len: usize) -> Option<&[u8]> {
        if addr == 0 {
            return None;
        }
        let start = usize::try_from(addr).ok()?;
        start.checked_add(len)?;

        // SAFETY: the addresses come from crypt32's own CTL_CONTEXT graph,
        // which stays allocated until the owning handle is dropped. A null
        // or wrapping range was rejected above.
        Some(unsafe { std::slice::from_raw_parts(start as *const u8, len) })
    }
}
