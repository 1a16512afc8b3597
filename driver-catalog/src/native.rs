//! Walking a crypt32 `CTL_CONTEXT` through a [`NativeMemory`] view.

#[cfg(feature = "serde")]
use serde::ser::SerializeStruct;
#[cfg(feature = "serde")]
use serde::Serialize;
use tracing::debug;

use crate::layout::{read_c_string, CtlLayout, NativeMemory, Record, RecordArray};
use crate::CatalogError;

/// OIDs longer than this are treated as corrupt.
const MAX_OID_LEN: usize = 256;

/// A single CTL extension, copied out of the catalog.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawExtension {
    /// The extension's dotted OID.
    pub oid: String,
    /// Whether the extension was marked critical.
    pub critical: bool,
    /// The encoded extension value.
    pub value: Vec<u8>,
}

#[cfg(feature = "serde")]
impl Serialize for RawExtension {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("RawExtension", 3)?;
        s.serialize_field("oid", &self.oid)?;
        s.serialize_field("critical", &self.critical)?;
        s.serialize_field("value", &hex::encode(&self.value))?;
        s.end()
    }
}

/// Reads every extension of the CTL whose `CTL_CONTEXT` lives at `context`.
///
/// Failing to read the context or the `CTL_INFO` block, or an extension array
/// whose span is unreadable, is a structural error. A single extension with a
/// bad OID pointer or value blob is skipped.
pub fn read_ctl_extensions(
    mem: &dyn NativeMemory,
    layout: &CtlLayout,
    context: u64,
) -> Result<Vec<RawExtension>, CatalogError> {
    let width = layout.pointer_width;

    let ctx = Record::new(mem, context, layout.context.size, width).ok_or(CatalogError::Layout {
        record: "CTL_CONTEXT",
        addr: context,
    })?;

    let info_addr = ctx
        .ptr_at(layout.context.ctl_info)
        .ok_or(CatalogError::Layout {
            record: "CTL_CONTEXT",
            addr: ctx.addr(),
        })?;
    if info_addr == 0 {
        return Err(CatalogError::NoCtlInfo);
    }

    let layout_err = CatalogError::Layout {
        record: "CTL_INFO",
        addr: info_addr,
    };
    let info = Record::new(mem, info_addr, layout.info.size, width).ok_or(layout_err)?;
    let (Some(count), Some(array)) = (
        info.u32_at(layout.info.extension_count),
        info.ptr_at(layout.info.extension_array),
    ) else {
        return Err(CatalogError::Layout {
            record: "CTL_INFO",
            addr: info.addr(),
        });
    };

    if count == 0 || array == 0 {
        return Ok(vec![]);
    }

    let extensions = RecordArray::new(mem, array, layout.extension.size, count as usize, width)
        .ok_or(CatalogError::Layout {
            record: "CERT_EXTENSION[]",
            addr: array,
        })?;

    let mut out = Vec::with_capacity(extensions.len());
    for (index, record) in extensions.iter().enumerate() {
        match record.and_then(|record| read_extension(mem, layout, &record)) {
            Some(ext) => out.push(ext),
            None => debug!(index, array, "skipping unreadable CERT_EXTENSION"),
        }
    }

    Ok(out)
}

fn read_extension(
    mem: &dyn NativeMemory,
    layout: &CtlLayout,
    record: &Record,
) -> Option<RawExtension> {
    let oid_addr = record.ptr_at(layout.extension.object_id)?;
    let oid = String::from_utf8(read_c_string(mem, oid_addr, MAX_OID_LEN)?).ok()?;
    if !oid.is_ascii() {
        return None;
    }

    let critical = record.u32_at(layout.extension.critical)? != 0;

    let len = record.u32_at(layout.extension.value_len)? as usize;
    let value = match len {
        0 => vec![],
        _ => mem
            .read(record.ptr_at(layout.extension.value_data)?, len)?
            .to_vec(),
    };

    Some(RawExtension {
        oid,
        critical,
        value,
    })
}
