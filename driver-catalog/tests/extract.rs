use std::cell::Cell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{EncapsulatedContentInfo, SignedData, SignerInfos};
use der::asn1::{Any, ObjectIdentifier, OctetString, SetOfVec, UtcTime};
use der::Encode;
use driver_catalog::ctl::{CatalogTrustList, CtlVersion, CATALOG_LIST_OID};
use driver_catalog::layout::{CtlLayout, MemoryImage};
use driver_catalog::native::read_ctl_extensions;
use driver_catalog::record::enrich;
use driver_catalog::scan::{scan_path, ScanError};
use driver_catalog::{
    CatalogError, CatalogLocator, CatalogMetadataEntry, CatalogQuery, CtlHandle, DerCatalogQuery,
    DeviceInfo, MetadataExtractor, RawExtension,
};
use spki::AlgorithmIdentifier;
use x509_cert::ext::pkix::ExtendedKeyUsage;
use x509_cert::ext::Extension;
use x509_cert::time::Time;

const NAMEVALUE: &str = "1.3.6.1.4.1.311.12.2.1";

fn be(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_be_bytes).collect()
}

fn le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// SEQUENCE { BMPString key, INTEGER 0x10010001, OCTET STRING value }
fn name_value(key: &str, value: &str) -> Vec<u8> {
    let (k, v) = (be(key), le(value));
    let mut body = vec![0x1E, k.len() as u8];
    body.extend(k);
    body.extend([0x02, 0x04, 0x10, 0x01, 0x00, 0x01]);
    body.extend([0x04, v.len() as u8]);
    body.extend(v);

    let mut out = vec![0x30, body.len() as u8];
    out.extend(body);
    out
}

/// Lays out a CTL_CONTEXT graph carrying the given extensions.
fn ctl_image(layout: &CtlLayout, extensions: &[(&str, Vec<u8>)]) -> (MemoryImage, u64) {
    let width = layout.pointer_width;
    let align = width.bytes();
    let mut image = MemoryImage::new(0x7FF0_0000);

    let context = image.alloc(layout.context.size, align);
    let info = image.alloc(layout.info.size, align);
    let array = image.alloc(layout.extension.size * extensions.len(), align);
    let ext = layout.extension;

    for (i, (oid, value)) in extensions.iter().enumerate() {
        let record = array + (i * ext.size) as u64;
        let oid_addr = image.alloc_c_string(oid);
        let value_addr = image.alloc_bytes(value);
        image.write_ptr(record + ext.object_id as u64, oid_addr, width);
        image.write_u32(record + ext.value_len as u64, value.len() as u32);
        image.write_ptr(record + ext.value_data as u64, value_addr, width);
    }

    image.write_ptr(context + layout.context.ctl_info as u64, info, width);
    image.write_u32(info + layout.info.extension_count as u64, extensions.len() as u32);
    image.write_ptr(info + layout.info.extension_array as u64, array, width);

    (image, context)
}

/// Encodes a signed catalog file whose trust list carries the given
/// extensions, padded the way catalog writers pad them.
fn der_catalog(extensions: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let ctl = CatalogTrustList {
        version: CtlVersion::V1,
        subject_usage: ExtendedKeyUsage(vec![CATALOG_LIST_OID]),
        list_identifier: Some(OctetString::new(vec![0x5A; 16]).unwrap()),
        sequence_number: None,
        this_update: Time::UtcTime(
            UtcTime::from_unix_duration(Duration::from_secs(1_700_000_000)).unwrap(),
        ),
        next_update: None,
        subject_algorithm: AlgorithmIdentifier {
            oid: ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.12.1.2"),
            parameters: Some(Any::null()),
        },
        members: None,
        ctl_extensions: Some(
            extensions
                .iter()
                .map(|(oid, value)| Extension {
                    extn_id: ObjectIdentifier::new_unwrap(oid),
                    critical: false,
                    extn_value: OctetString::new(value.clone()).unwrap(),
                })
                .collect(),
        ),
    };

    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::new(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: driver_catalog::MS_CERT_TRUST_LIST_OID,
            econtent: Some(Any::encode_from(&ctl).unwrap()),
        },
        certificates: None,
        crls: None,
        signer_infos: SignerInfos(SetOfVec::new()),
    };

    let mut der = ContentInfo {
        content_type: driver_catalog::query::SIGNED_DATA_OID,
        content: Any::encode_from(&signed_data).unwrap(),
    }
    .to_der()
    .unwrap();
    der.extend([0u8; 6]);
    der
}

/// A catalog query over in-memory CTL images, keyed by file name.
#[derive(Default)]
struct ImageQuery {
    catalogs: HashMap<String, (MemoryImage, u64, &'static CtlLayout)>,
    releases: Rc<Cell<usize>>,
}

impl ImageQuery {
    fn with(
        mut self,
        name: &str,
        layout: &'static CtlLayout,
        extensions: &[(&str, Vec<u8>)],
    ) -> Self {
        let (image, context) = ctl_image(layout, extensions);
        self.catalogs.insert(name.to_string(), (image, context, layout));
        self
    }

    fn with_image(mut self, name: &str, image: MemoryImage, context: u64) -> Self {
        self.catalogs
            .insert(name.to_string(), (image, context, &CtlLayout::WIN64));
        self
    }
}

struct ImageHandle {
    image: MemoryImage,
    context: u64,
    layout: &'static CtlLayout,
    releases: Rc<Cell<usize>>,
}

impl CatalogQuery for ImageQuery {
    fn open(&self, path: &Path) -> Result<Box<dyn CtlHandle>, CatalogError> {
        let name = path.file_name().unwrap().to_string_lossy();
        match self.catalogs.get(name.as_ref()) {
            Some((image, context, layout)) => Ok(Box::new(ImageHandle {
                image: image.clone(),
                context: *context,
                layout: *layout,
                releases: self.releases.clone(),
            })),
            None => Err(CatalogError::Open {
                path: path.display().to_string(),
                reason: "not a catalog".into(),
            }),
        }
    }
}

impl CtlHandle for ImageHandle {
    fn extensions(&self) -> Result<Vec<RawExtension>, CatalogError> {
        read_ctl_extensions(&self.image, self.layout, self.context)
    }
}

impl Drop for ImageHandle {
    fn drop(&mut self) {
        self.releases.set(self.releases.get() + 1);
    }
}

fn entry(key: &str, value: &str) -> CatalogMetadataEntry {
    CatalogMetadataEntry {
        key: key.into(),
        value: value.into(),
    }
}

#[test]
fn test_extracts_name_values_in_order() {
    let query = ImageQuery::default().with(
        "oem1.cat",
        &CtlLayout::WIN64,
        &[
            (NAMEVALUE, name_value("OSAttr", "2:6.1")),
            ("1.3.6.1.4.1.311.12.2.2", name_value("Ignored", "member info")),
            (NAMEVALUE, vec![0x31, 0x00]),
            (NAMEVALUE, name_value("HWID1", "pci\\ven_8086&dev_1234")),
            (NAMEVALUE, name_value("OSAttr", "2:10.0")),
        ],
    );
    let releases = query.releases.clone();
    let extractor = MetadataExtractor::new(query);

    let entries = extractor.extract("C:/catroot/oem1.cat").unwrap();
    assert_eq!(
        entries,
        vec![
            entry("OSAttr", "2:6.1"),
            entry("HWID1", "pci\\ven_8086&dev_1234"),
            entry("OSAttr", "2:10.0"),
        ]
    );
    assert_eq!(releases.get(), 1);
}

#[test]
fn test_win32_layout() {
    let query = ImageQuery::default().with(
        "x86.cat",
        &CtlLayout::WIN32,
        &[(NAMEVALUE, name_value("CatalogVersion", "2"))],
    );
    let extractor = MetadataExtractor::new(query);
    assert_eq!(
        extractor.extract("x86.cat").unwrap(),
        vec![entry("CatalogVersion", "2")]
    );
}

#[test]
fn test_catalog_without_extensions() {
    let query = ImageQuery::default().with("bare.cat", &CtlLayout::WIN64, &[]);
    let releases = query.releases.clone();
    let extractor = MetadataExtractor::new(query);

    assert_eq!(extractor.extract("bare.cat").unwrap(), vec![]);
    assert_eq!(releases.get(), 1);
}

#[test]
fn test_no_ctl_info_still_releases() {
    let layout = CtlLayout::WIN64;
    let mut image = MemoryImage::new(0x1000);
    let context = image.alloc(layout.context.size, 8);

    let query = ImageQuery::default().with_image("empty.cat", image, context);
    let releases = query.releases.clone();
    let extractor = MetadataExtractor::new(query);

    let err = extractor.extract("empty.cat").unwrap_err();
    assert!(matches!(err, CatalogError::NoCtlInfo));
    assert_eq!(err.stage(), "no-ctl-info");
    assert_eq!(releases.get(), 1);
}

#[test]
fn test_bad_extension_array_still_releases() {
    let layout = CtlLayout::WIN64;
    let mut image = MemoryImage::new(0x1000);
    let context = image.alloc(layout.context.size, 8);
    let info = image.alloc(layout.info.size, 8);
    image.write_ptr(context + layout.context.ctl_info as u64, info, layout.pointer_width);
    image.write_u32(info + layout.info.extension_count as u64, 4);
    image.write_ptr(
        info + layout.info.extension_array as u64,
        0xFFFF_0000,
        layout.pointer_width,
    );

    let query = ImageQuery::default().with_image("broken.cat", image, context);
    let releases = query.releases.clone();
    let extractor = MetadataExtractor::new(query);

    let err = extractor.extract("broken.cat").unwrap_err();
    assert_eq!(err.stage(), "layout");
    assert_eq!(releases.get(), 1);
}

#[test]
fn test_open_failure() {
    let query = ImageQuery::default();
    let releases = query.releases.clone();
    let extractor = MetadataExtractor::new(query);

    let err = extractor.extract("missing.cat").unwrap_err();
    assert_eq!(err.stage(), "open");
    assert_eq!(releases.get(), 0);
}

#[test]
fn test_raw_extensions() {
    let query = ImageQuery::default().with(
        "raw.cat",
        &CtlLayout::WIN64,
        &[("2.5.29.19", vec![0x30, 0x00]), (NAMEVALUE, name_value("K", "V"))],
    );
    let extractor = MetadataExtractor::new(query);

    let raw = extractor.raw_extensions("raw.cat").unwrap();
    assert_eq!(raw.len(), 2);
    assert_eq!(raw[0].oid, "2.5.29.19");
    assert_eq!(raw[1].oid, NAMEVALUE);
}

#[test]
fn test_scan_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    for name in ["a.cat", "broken.cat", "c.inf", "sub/B.CAT"] {
        std::fs::write(dir.path().join(name), b"").unwrap();
    }

    let query = ImageQuery::default()
        .with(
            "a.cat",
            &CtlLayout::WIN64,
            &[
                (NAMEVALUE, name_value("HWID2", "usb\\vid_1234")),
                (NAMEVALUE, name_value("PackageVersion", "1.0")),
            ],
        )
        .with("B.CAT", &CtlLayout::WIN64, &[])
        .with("c.inf", &CtlLayout::WIN64, &[(NAMEVALUE, name_value("K", "V"))]);
    let extractor = MetadataExtractor::new(query);

    let report = scan_path(dir.path(), &extractor).unwrap();
    let names: Vec<_> = report.records.iter().map(|r| r.device_name.as_str()).collect();
    assert_eq!(names, ["a.cat", "broken.cat", "B.CAT"]);

    assert_eq!(report.records[0].metadata.len(), 1);
    assert_eq!(report.records[0].metadata["PackageVersion"], "1.0");
    assert!(report.records[1].metadata.is_empty());
    assert!(report.records[2].metadata.is_empty());

    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.with_metadata, 1);
    assert_eq!(report.summary.empty, 1);
    assert_eq!(report.summary.failed, 1);
}

#[test]
fn test_scan_single_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("package.bin");
    std::fs::write(&file, b"").unwrap();

    let query = ImageQuery::default().with(
        "package.bin",
        &CtlLayout::WIN64,
        &[(NAMEVALUE, name_value("OSAttr", "2:10.0"))],
    );
    let extractor = MetadataExtractor::new(query);

    let report = scan_path(&file, &extractor).unwrap();
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].metadata["OSAttr"], "2:10.0");
}

#[test]
fn test_scan_missing_root() {
    let extractor = MetadataExtractor::new(ImageQuery::default());
    assert!(matches!(
        scan_path("/definitely/not/here", &extractor),
        Err(ScanError::NotFound(_))
    ));
}

#[test]
fn test_enrich_device() {
    let catroot = tempfile::tempdir().unwrap();
    std::fs::write(catroot.path().join("oem7.cat"), b"").unwrap();

    let query = ImageQuery::default().with(
        "oem7.cat",
        &CtlLayout::WIN64,
        &[
            (NAMEVALUE, name_value("OSAttr", "2:10.0")),
            (NAMEVALUE, name_value("HWID1", "acpi\\idea200a")),
        ],
    );
    let extractor = MetadataExtractor::new(query);
    let locator = CatalogLocator::new(catroot.path());

    let device = DeviceInfo {
        device_name: "Lenovo Vantage Service".into(),
        version: "1.2.3.4".into(),
        manufacturer: "Lenovo".into(),
        inf_name: "oem7.inf".into(),
        pnp_device_id: "ACPI\\IDEA200A\\0".into(),
        signed_driver_hardware_id: "ACPI\\VEN_IDEA&DEV_200A".into(),
        hardware_ids: vec![
            "ACPI\\VEN_IDEA&DEV_200A".into(),
            "ACPI\\IDEA200A".into(),
            "ACPI\\IDEA200A".into(),
            " ".into(),
            "*IDEA200A".into(),
        ],
        compatible_ids: vec![],
    };

    let record = enrich(device, &locator, &extractor);
    assert_eq!(
        record.hardware_ids,
        ["ACPI\\VEN_IDEA&DEV_200A", "ACPI\\IDEA200A", "*IDEA200A"]
    );
    assert_eq!(record.raw_matched_hardware_id, "ACPI\\VEN_IDEA&DEV_200A");
    assert_eq!(record.display_matched_hardware_id, "ACPI\\IDEA200A");
    assert!(record.catalog_path.ends_with("oem7.cat"));
    assert_eq!(record.metadata.len(), 1);
    assert_eq!(record.metadata["OSAttr"], "2:10.0");
}

#[test]
fn test_enrich_without_catalog() {
    let catroot = tempfile::tempdir().unwrap();
    let extractor = MetadataExtractor::new(ImageQuery::default());
    let locator = CatalogLocator::new(catroot.path());

    let record = enrich(
        DeviceInfo {
            inf_name: "oem99.inf".into(),
            hardware_ids: vec!["PCI\\VEN_8086&DEV_1234".into()],
            ..Default::default()
        },
        &locator,
        &extractor,
    );
    assert_eq!(record.catalog_path, "");
    assert!(record.metadata.is_empty());
    assert_eq!(record.raw_matched_hardware_id, "PCI\\VEN_8086&DEV_1234");
    assert_eq!(record.display_matched_hardware_id, "PCI\\VEN_8086&DEV_1234");
}

#[test]
fn test_der_catalog_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("oem3.cat");
    std::fs::write(
        &path,
        der_catalog(&[
            (NAMEVALUE, name_value("OSAttr", "2:6.1")),
            ("1.3.6.1.4.1.311.12.2.2", name_value("Ignored", "member info")),
            (NAMEVALUE, name_value("HWID1", "usb\\vid_046d&pid_c52b")),
            (NAMEVALUE, vec![0x30, 0x03, 0x1E, 0x02, 0x00]),
            (NAMEVALUE, name_value("OSAttr", "2:10.0")),
        ]),
    )
    .unwrap();

    let extractor = MetadataExtractor::new(DerCatalogQuery);
    assert_eq!(
        extractor.extract(&path).unwrap(),
        vec![
            entry("OSAttr", "2:6.1"),
            entry("HWID1", "usb\\vid_046d&pid_c52b"),
            entry("OSAttr", "2:10.0"),
        ]
    );

    let report = scan_path(dir.path(), &extractor).unwrap();
    assert_eq!(report.records.len(), 1);
    let record = &report.records[0];
    assert_eq!(record.device_name, "oem3.cat");
    assert_eq!(record.metadata.len(), 1);
    assert_eq!(record.metadata["OSAttr"], "2:10.0");
    assert_eq!(report.summary.with_metadata, 1);
}

#[test]
fn test_der_backend_rejects_non_catalog_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("bogus.cat"), b"MZ\x90\x00 not a catalog").unwrap();

    let extractor = MetadataExtractor::new(DerCatalogQuery);
    let report = scan_path(dir.path(), &extractor).unwrap();
    assert_eq!(report.summary.total, 1);
    assert_eq!(report.summary.failed, 1);
    assert!(report.records[0].metadata.is_empty());
}
