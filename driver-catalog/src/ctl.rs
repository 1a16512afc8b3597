//! The ASN.1 model of a catalog's certificate trust list.

use der::asn1::{Any, ObjectIdentifier, OctetString, Uint};
use der::{Enumerated, Sequence};
use spki::AlgorithmIdentifier;
use x509_cert::ext::pkix::ExtendedKeyUsage;
use x509_cert::ext::Extensions;
use x509_cert::time::Time;

/// The subject usage identifying a CTL as a catalog member list
/// (`szOID_CATALOG_LIST`).
pub const CATALOG_LIST_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.12.1.1");

/// Version identifier for a trust list.
///
/// ```asn1
/// CTLVersion ::= INTEGER {v1(0)}
/// ```
#[derive(Clone, Debug, Copy, PartialEq, Eq, Enumerated)]
#[asn1(type = "INTEGER")]
#[repr(u8)]
#[derive(Default)]
pub enum CtlVersion {
    /// CtlVersion 1 (default)
    #[default]
    V1 = 0,
}

/// One catalog member: a file hash plus its attributes.
///
/// ```asn1
/// CatalogMember ::= SEQUENCE {
///   subjectIdentifier OCTET STRING,
///   subjectAttributes SET OF Attribute OPTIONAL
/// }
/// ```
///
/// Attributes are kept undecoded: catalog writers do not sort them the way
/// DER `SET OF` requires.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct CatalogMember {
    identifier: OctetString,
    /// The member's raw attribute set.
    pub attributes: Option<Any>,
}

impl CatalogMember {
    /// Returns the member's subject identifier, as bytes.
    pub fn subject_id(&self) -> &[u8] {
        self.identifier.as_bytes()
    }
}

/// The trust list a catalog file's `SignedData` encapsulates.
///
/// ```asn1
/// CertificateTrustList ::= SEQUENCE {
///   version CTLVersion DEFAULT v1,
///   subjectUsage SubjectUsage,
///   listIdentifier ListIdentifier OPTIONAL,
///   sequenceNumber HUGEINTEGER OPTIONAL,
///   ctlThisUpdate ChoiceOfTime,
///   ctlNextUpdate ChoiceOfTime OPTIONAL,
///   subjectAlgorithm AlgorithmIdentifier,
///   trustedSubjects TrustedSubjects OPTIONAL,
///   ctlExtensions [0] EXPLICIT Extensions OPTIONAL
/// }
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct CatalogTrustList {
    /// This trust list's version. The default version is 1.
    #[asn1(default = "Default::default")]
    pub version: CtlVersion,

    /// X.509-style usage; [`CATALOG_LIST_OID`] for driver catalogs.
    pub subject_usage: ExtendedKeyUsage,

    /// Usually a 16-byte GUID-ish tag chosen by the catalog writer.
    pub list_identifier: Option<OctetString>,

    /// Some kind of sequence number; purpose unknown.
    pub sequence_number: Option<Uint>,

    /// When the catalog was generated.
    pub this_update: Time,

    /// Unused by catalogs, but allowed by the CTL grammar.
    pub next_update: Option<Time>,

    /// The hash algorithm used for each member's identifier.
    pub subject_algorithm: AlgorithmIdentifier<Any>,

    /// The files this catalog covers.
    pub members: Option<Vec<CatalogMember>>,

    /// Catalog-wide extensions, where the name/value attributes live.
    #[asn1(context_specific = "0", optional = "true", tag_mode = "EXPLICIT")]
    pub ctl_extensions: Option<Extensions>,
}

impl CatalogTrustList {
    /// True if the subject usage marks this as a driver catalog.
    pub fn is_catalog_list(&self) -> bool {
        self.subject_usage.0.contains(&CATALOG_LIST_OID)
    }

    /// Number of member entries.
    pub fn member_count(&self) -> usize {
        self.members.as_ref().map_or(0, Vec::len)
    }
}
