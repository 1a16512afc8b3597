//! A crate for pulling driver metadata out of Windows catalog (`.cat`) files
//! and for picking the hardware ID a driver was matched against.
//!
//! Catalog files are Authenticode-signed Certificate Trust Lists. Tooling that
//! produces them (`inf2cat` and friends) stashes name/value attributes such as
//! `OSAttr` or a package version in the CTL's extension list, under the
//! [`CAT_NAMEVALUE_OID`] identifier. This crate opens the catalog, walks those
//! extensions, and decodes each attribute into a [`CatalogMetadataEntry`].
//!
//! Nothing here validates signatures or certificate chains: the CTL is only
//! mined for metadata.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_docs)]
#![allow(clippy::redundant_field_names)]
#![deny(unsafe_code)]

use der::asn1::ObjectIdentifier;
use thiserror::Error;

pub mod attr;
pub mod ctl;
pub mod extract;
pub mod layout;
pub mod matcher;
pub mod native;
pub mod query;
pub mod record;
pub mod scan;

#[cfg(windows)]
pub mod crypt32;

pub use crate::attr::CatalogMetadataEntry;
pub use crate::extract::MetadataExtractor;
pub use crate::matcher::{
    is_matched_for_display, pick_display_matched_hardware_id, pick_raw_matched_hardware_id,
    HardwareIdSet,
};
pub use crate::native::RawExtension;
pub use crate::query::{default_query, CatalogQuery, CtlHandle, DerCatalogQuery};
pub use crate::record::{CatalogLocator, DeviceInfo, DriverRecord};

/// The object identifier for the trust list carried in a catalog's `SignedData`.
pub const MS_CERT_TRUST_LIST_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.10.1");

/// The OID of a catalog-level name/value attribute (`CAT_NAMEVALUE_OBJID`).
pub const CAT_NAMEVALUE_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.12.2.1");

/// Possible errors while opening or walking a catalog.
///
/// Only failures to acquire the trust list surface here. A single attribute
/// that fails to decode is skipped rather than reported.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// I/O errors.
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// Invalid DER.
    #[error("bad DER encoding")]
    Der(#[from] der::Error),

    /// The platform catalog query refused the file.
    #[error("catalog query failed for {path}: {reason}")]
    Open {
        /// The file that was queried.
        path: String,
        /// What the platform reported.
        reason: String,
    },

    /// Valid DER, but not a CMS `SignedData`.
    #[error("bad content-type: expected SignedData, got {0}")]
    ContentType(ObjectIdentifier),

    /// Valid `SignedData`, but not a certificate trust list.
    #[error("bad SignedData content-type: expected {MS_CERT_TRUST_LIST_OID}, got {0}")]
    Content(ObjectIdentifier),

    /// The catalog opened, but carries no trust list payload.
    #[error("catalog has no CTL info")]
    NoCtlInfo,

    /// A native record could not be read at the address it was expected.
    #[error("unreadable {record} record at {addr:#x}")]
    Layout {
        /// The record being read.
        record: &'static str,
        /// Where it was expected.
        addr: u64,
    },
}

impl CatalogError {
    /// The extraction stage this error belongs to: `"open"`, `"no-ctl-info"`
    /// or `"layout"`.
    pub fn stage(&self) -> &'static str {
        match self {
            CatalogError::NoCtlInfo => "no-ctl-info",
            CatalogError::Layout { .. } => "layout",
            _ => "open",
        }
    }
}
