//! The catalog query service: how a path becomes a walkable trust list.
//!
//! A [`CatalogQuery`] is built once and handed to the extractor, so tests can
//! substitute a fake for the platform facility.

use std::fs;
use std::path::Path;

use cms::content_info::ContentInfo;
use cms::signed_data::SignedData;
use der::asn1::ObjectIdentifier;
use der::{Decode, SliceReader};
use tracing::debug;

use crate::ctl::CatalogTrustList;
use crate::native::RawExtension;
use crate::{CatalogError, MS_CERT_TRUST_LIST_OID};

/// The CMS `signedData` content type.
pub const SIGNED_DATA_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");

/// Opens catalog files.
pub trait CatalogQuery {
    /// Opens the catalog at `path`.
    ///
    /// Any resources backing the returned handle are released when it is
    /// dropped.
    fn open(&self, path: &Path) -> Result<Box<dyn CtlHandle>, CatalogError>;
}

/// An opened catalog.
pub trait CtlHandle {
    /// Returns every extension of the catalog's trust list, in order.
    ///
    /// Fails with [`CatalogError::NoCtlInfo`] if the catalog opened but has
    /// no trust list payload.
    fn extensions(&self) -> Result<Vec<RawExtension>, CatalogError>;
}

impl<Q: CatalogQuery + ?Sized> CatalogQuery for Box<Q> {
    fn open(&self, path: &Path) -> Result<Box<dyn CtlHandle>, CatalogError> {
        (**self).open(path)
    }
}

impl<Q: CatalogQuery + ?Sized> CatalogQuery for &Q {
    fn open(&self, path: &Path) -> Result<Box<dyn CtlHandle>, CatalogError> {
        (**self).open(path)
    }
}

/// The preferred catalog query for this platform: crypt32 on Windows, the
/// DER decoder elsewhere.
pub fn default_query() -> Box<dyn CatalogQuery> {
    #[cfg(windows)]
    {
        Box::new(crate::crypt32::Crypt32::new())
    }
    #[cfg(not(windows))]
    {
        Box::new(DerCatalogQuery)
    }
}

/// A portable catalog query that decodes the file's PKCS#7 envelope itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct DerCatalogQuery;

impl CatalogQuery for DerCatalogQuery {
    fn open(&self, path: &Path) -> Result<Box<dyn CtlHandle>, CatalogError> {
        let der = fs::read(path)?;
        Ok(Box::new(DerCatalog::from_der(&der)?))
    }
}

/// A catalog decoded from its DER encoding.
#[derive(Clone, Debug)]
pub struct DerCatalog {
    ctl: Option<CatalogTrustList>,
}

impl DerCatalog {
    /// Decodes a catalog from DER-encoded PKCS#7 `SignedData`.
    pub fn from_der(der: &[u8]) -> Result<Self, CatalogError> {
        // Catalog files are often padded past the end of the ContentInfo, so
        // read with a SliceReader rather than `from_der`, which rejects
        // trailing data.
        let mut reader = SliceReader::new(der)?;
        let content_info = ContentInfo::decode(&mut reader)?;

        if content_info.content_type != SIGNED_DATA_OID {
            return Err(CatalogError::ContentType(content_info.content_type));
        }

        let signed_data = content_info.content.decode_as::<SignedData>()?;

        // Our actual SignedData content should be a MS-specific `certTrustList`.
        if signed_data.encap_content_info.econtent_type != MS_CERT_TRUST_LIST_OID {
            return Err(CatalogError::Content(
                signed_data.encap_content_info.econtent_type,
            ));
        }

        let Some(content) = signed_data.encap_content_info.econtent else {
            return Ok(DerCatalog { ctl: None });
        };

        let ctl: CatalogTrustList = content.decode_as()?;
        if !ctl.is_catalog_list() {
            debug!(usage = ?ctl.subject_usage, "trust list is not a catalog member list");
        }
        debug!(members = ctl.member_count(), "decoded catalog trust list");

        Ok(DerCatalog { ctl: Some(ctl) })
    }

    /// The decoded trust list, if the catalog carried one.
    pub fn trust_list(&self) -> Option<&CatalogTrustList> {
        self.ctl.as_ref()
    }
}

impl CtlHandle for DerCatalog {
    fn extensions(&self) -> Result<Vec<RawExtension>, CatalogError> {
        let ctl = self.ctl.as_ref().ok_or(CatalogError::NoCtlInfo)?;

        Ok(ctl
            .ctl_extensions
            .iter()
            .flatten()
            .map(|ext| RawExtension {
                oid: ext.extn_id.to_string(),
                critical: ext.critical,
                value: ext.extn_value.as_bytes().to_vec(),
            })
            .collect())
    }
}
