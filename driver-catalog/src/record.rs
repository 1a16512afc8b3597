//! Driver records: what device enumeration reports, enriched with catalog
//! metadata and the matched hardware IDs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::attr::CatalogMetadataEntry;
use crate::extract::MetadataExtractor;
use crate::matcher::{pick_display_matched_hardware_id, pick_raw_matched_hardware_id, HardwareIdSet};
use crate::query::CatalogQuery;

/// Where Windows keeps the catalogs of installed driver packages.
pub const DEFAULT_CATROOT: &str =
    r"C:\Windows\System32\CatRoot\{F750E6C3-38EE-11D1-85E5-00C04FC295EE}";

/// One driver as reported by device enumeration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct DeviceInfo {
    /// Friendly device name.
    pub device_name: String,
    /// Driver version.
    pub version: String,
    /// Driver manufacturer.
    pub manufacturer: String,
    /// The installed INF, e.g. `oem42.inf`.
    pub inf_name: String,
    /// The PnP device instance ID.
    pub pnp_device_id: String,
    /// The hardware ID the signed driver was installed for.
    pub signed_driver_hardware_id: String,
    /// The device's hardware IDs.
    pub hardware_ids: Vec<String>,
    /// The device's compatible IDs.
    pub compatible_ids: Vec<String>,
}

/// A driver enriched with its catalog metadata and matched hardware IDs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct DriverRecord {
    /// Friendly device name.
    pub device_name: String,
    /// Driver version.
    pub version: String,
    /// Driver manufacturer.
    pub manufacturer: String,
    /// The installed INF.
    pub inf_name: String,
    /// The catalog the metadata came from, if one was found.
    pub catalog_path: String,
    /// The PnP device instance ID.
    pub pnp_device_id: String,
    /// The hardware ID the signed driver was installed for.
    pub signed_driver_hardware_id: String,
    /// The device's hardware IDs.
    pub hardware_ids: Vec<String>,
    /// The device's compatible IDs.
    pub compatible_ids: Vec<String>,
    /// See [`pick_raw_matched_hardware_id`].
    pub raw_matched_hardware_id: String,
    /// See [`pick_display_matched_hardware_id`].
    pub display_matched_hardware_id: String,
    /// Catalog attributes, minus any `HWID*` keys.
    pub metadata: BTreeMap<String, String>,
}

/// True for catalog attribute keys that are not surfaced as metadata: those
/// starting with `HWID`, in any case.
pub fn is_excluded_metadata_key(key: &str) -> bool {
    key.as_bytes()
        .get(..4)
        .map_or(false, |head| head.eq_ignore_ascii_case(b"HWID"))
}

impl DriverRecord {
    /// A record for a bare catalog file, named after the file.
    pub fn for_catalog(path: &Path) -> Self {
        DriverRecord {
            device_name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            catalog_path: path.display().to_string(),
            ..Default::default()
        }
    }

    /// Merges catalog attributes into the metadata map. Excluded keys are
    /// dropped; for repeated keys the last entry wins.
    pub fn merge_metadata<'a>(
        &mut self,
        entries: impl IntoIterator<Item = &'a CatalogMetadataEntry>,
    ) {
        for entry in entries {
            if is_excluded_metadata_key(&entry.key) {
                continue;
            }
            self.metadata.insert(entry.key.clone(), entry.value.clone());
        }
    }
}

/// Resolves an INF name to its installed catalog.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CatalogLocator {
    root: PathBuf,
}

impl Default for CatalogLocator {
    fn default() -> Self {
        CatalogLocator::new(DEFAULT_CATROOT)
    }
}

impl CatalogLocator {
    /// A locator that looks for catalogs directly under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        CatalogLocator { root: root.into() }
    }

    /// The directory searched.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The catalog for `inf_name` (`oem42.inf` → `<root>/oem42.cat`), if it
    /// exists.
    pub fn find(&self, inf_name: &str) -> Option<PathBuf> {
        let inf_name = inf_name.trim();
        if inf_name.is_empty() {
            return None;
        }

        let path = self.root.join(Path::new(inf_name).with_extension("cat"));
        path.is_file().then_some(path)
    }
}

/// Builds the driver record for one enumerated device.
///
/// Extraction failures are logged and leave the metadata empty.
pub fn enrich<Q: CatalogQuery>(
    device: DeviceInfo,
    locator: &CatalogLocator,
    extractor: &MetadataExtractor<Q>,
) -> DriverRecord {
    let ids = HardwareIdSet::new(device.hardware_ids, device.compatible_ids);
    let raw = pick_raw_matched_hardware_id(&device.signed_driver_hardware_id, &ids.hardware_ids);
    let display = pick_display_matched_hardware_id(&raw, &ids.hardware_ids);

    let mut record = DriverRecord {
        device_name: device.device_name,
        version: device.version,
        manufacturer: device.manufacturer,
        inf_name: device.inf_name,
        catalog_path: String::new(),
        pnp_device_id: device.pnp_device_id,
        signed_driver_hardware_id: device.signed_driver_hardware_id,
        hardware_ids: ids.hardware_ids,
        compatible_ids: ids.compatible_ids,
        raw_matched_hardware_id: raw,
        display_matched_hardware_id: display,
        metadata: BTreeMap::new(),
    };

    let Some(catalog) = locator.find(&record.inf_name) else {
        debug!(inf = %record.inf_name, "no catalog found");
        return record;
    };
    record.catalog_path = catalog.display().to_string();

    match extractor.extract(&catalog) {
        Ok(entries) => record.merge_metadata(&entries),
        Err(e) => warn!(
            catalog = %catalog.display(),
            stage = e.stage(),
            "couldn't read catalog metadata: {e}"
        ),
    }

    record
}
