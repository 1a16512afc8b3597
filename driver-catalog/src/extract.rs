//! Catalog metadata extraction.

use std::path::Path;

use tracing::{debug, trace};

use crate::attr::{decode_name_value, CatalogMetadataEntry};
use crate::native::RawExtension;
use crate::query::CatalogQuery;
use crate::{CatalogError, CAT_NAMEVALUE_OID};

/// Pulls name/value metadata out of catalog files.
#[derive(Clone, Debug)]
pub struct MetadataExtractor<Q> {
    query: Q,
}

impl<Q: CatalogQuery> MetadataExtractor<Q> {
    /// Creates an extractor over the given catalog query.
    pub fn new(query: Q) -> Self {
        MetadataExtractor { query }
    }

    /// Every extension of the catalog's trust list, undecoded.
    pub fn raw_extensions(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Vec<RawExtension>, CatalogError> {
        let handle = self.query.open(path.as_ref())?;
        handle.extensions()
    }

    /// Decodes every name/value attribute of the catalog at `path`, in
    /// extension order.
    ///
    /// Fails only if the catalog cannot be opened or has no trust list.
    /// Attributes that do not decode are skipped.
    pub fn extract(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Vec<CatalogMetadataEntry>, CatalogError> {
        let path = path.as_ref();
        let extensions = self.raw_extensions(path)?;
        let oid = CAT_NAMEVALUE_OID.to_string();

        let entries: Vec<_> = extensions
            .iter()
            .filter(|ext| ext.oid == oid)
            .filter_map(|ext| {
                let entry = decode_name_value(&ext.value);
                if entry.is_none() {
                    debug!(
                        path = %path.display(),
                        len = ext.value.len(),
                        "undecodable name/value attribute"
                    );
                }
                entry
            })
            .collect();

        trace!(
            path = %path.display(),
            extensions = extensions.len(),
            entries = entries.len(),
            "extracted catalog metadata"
        );
        Ok(entries)
    }
}
