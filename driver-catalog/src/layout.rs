//! Fixed-offset schemas for the crypt32 CTL structures, and the bounds-checked
//! memory view they are read through.
//!
//! The platform hands back a `CTL_CONTEXT` pointer. Everything reachable from
//! it (`CTL_INFO`, the `CERT_EXTENSION` array, OID strings, value blobs) is
//! read through [`NativeMemory::read`], so each traversal is validated before
//! it is dereferenced.

/// Width of a native pointer in a [`CtlLayout`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PointerWidth {
    /// 4-byte pointers (x86, ARM32).
    Bits32,
    /// 8-byte pointers (x64, ARM64).
    Bits64,
}

impl PointerWidth {
    /// Size of a pointer in bytes.
    pub const fn bytes(self) -> usize {
        match self {
            PointerWidth::Bits32 => 4,
            PointerWidth::Bits64 => 8,
        }
    }
}

/// Offsets into `CTL_CONTEXT`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ContextLayout {
    /// `sizeof(CTL_CONTEXT)`.
    pub size: usize,
    /// `pCtlInfo`.
    pub ctl_info: usize,
}

/// Offsets into `CTL_INFO`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InfoLayout {
    /// `sizeof(CTL_INFO)`.
    pub size: usize,
    /// `cExtension`.
    pub extension_count: usize,
    /// `rgExtension`.
    pub extension_array: usize,
}

/// Offsets into `CERT_EXTENSION`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExtensionLayout {
    /// `sizeof(CERT_EXTENSION)`, the array stride.
    pub size: usize,
    /// `pszObjId`.
    pub object_id: usize,
    /// `fCritical`.
    pub critical: usize,
    /// `Value.cbData`.
    pub value_len: usize,
    /// `Value.pbData`.
    pub value_data: usize,
}

/// A versioned description of the CTL records as crypt32 lays them out.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CtlLayout {
    /// Human-readable name, for diagnostics.
    pub name: &'static str,
    /// Pointer width the offsets were computed for.
    pub pointer_width: PointerWidth,
    /// `CTL_CONTEXT`.
    pub context: ContextLayout,
    /// `CTL_INFO`.
    pub info: InfoLayout,
    /// `CERT_EXTENSION`.
    pub extension: ExtensionLayout,
}

impl CtlLayout {
    /// 64-bit Windows: natural alignment, pointers padded to 8.
    pub const WIN64: CtlLayout = CtlLayout {
        name: "win64",
        pointer_width: PointerWidth::Bits64,
        context: ContextLayout {
            size: 64,
            ctl_info: 24,
        },
        // dwVersion, SubjectUsage, ListIdentifier, SequenceNumber, ThisUpdate,
        // NextUpdate, SubjectAlgorithm, cCTLEntry, rgCTLEntry, cExtension, rgExtension
        info: InfoLayout {
            size: 128,
            extension_count: 112,
            extension_array: 120,
        },
        extension: ExtensionLayout {
            size: 32,
            object_id: 0,
            critical: 8,
            value_len: 16,
            value_data: 24,
        },
    };

    /// 32-bit Windows: everything is 4-byte aligned.
    pub const WIN32: CtlLayout = CtlLayout {
        name: "win32",
        pointer_width: PointerWidth::Bits32,
        context: ContextLayout {
            size: 32,
            ctl_info: 12,
        },
        info: InfoLayout {
            size: 72,
            extension_count: 64,
            extension_array: 68,
        },
        extension: ExtensionLayout {
            size: 16,
            object_id: 0,
            critical: 4,
            value_len: 8,
            value_data: 12,
        },
    };

    /// The layout matching the target this crate was compiled for.
    pub const fn host() -> &'static CtlLayout {
        #[cfg(target_pointer_width = "64")]
        {
            &CtlLayout::WIN64
        }
        #[cfg(not(target_pointer_width = "64"))]
        {
            &CtlLayout::WIN32
        }
    }
}

/// A source of native memory.
///
/// This is the only way the walker touches memory it did not allocate.
pub trait NativeMemory {
    /// Returns the `len` bytes at `addr`, or `None` if any part of that range
    /// is null, overflows, or is not readable.
    fn read(&self, addr: u64, len: usize) -> Option<&[u8]>;
}

/// A fixed-size record whose full span was validated on construction.
#[derive(Clone, Copy, Debug)]
pub struct Record<'a> {
    addr: u64,
    bytes: &'a [u8],
    width: PointerWidth,
}

impl<'a> Record<'a> {
    /// Validates and captures `size` bytes at `addr`.
    pub fn new(
        mem: &'a dyn NativeMemory,
        addr: u64,
        size: usize,
        width: PointerWidth,
    ) -> Option<Self> {
        if addr == 0 {
            return None;
        }
        let bytes = mem.read(addr, size)?;
        (bytes.len() == size).then_some(Record { addr, bytes, width })
    }

    /// The record's base address.
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// Reads a little-endian `u32` field.
    pub fn u32_at(&self, offset: usize) -> Option<u32> {
        let field = self.bytes.get(offset..offset.checked_add(4)?)?;
        Some(u32::from_le_bytes(field.try_into().ok()?))
    }

    /// Reads a pointer-sized field, widened to `u64`.
    pub fn ptr_at(&self, offset: usize) -> Option<u64> {
        match self.width {
            PointerWidth::Bits32 => self.u32_at(offset).map(u64::from),
            PointerWidth::Bits64 => {
                let field = self.bytes.get(offset..offset.checked_add(8)?)?;
                Some(u64::from_le_bytes(field.try_into().ok()?))
            }
        }
    }
}

/// A C-style array, described by `(base, stride, count)`.
#[derive(Clone, Copy)]
pub struct RecordArray<'a> {
    mem: &'a dyn NativeMemory,
    base: u64,
    stride: usize,
    count: usize,
    width: PointerWidth,
}

impl<'a> RecordArray<'a> {
    /// Validates the whole array span once. Returns `None` for a null base,
    /// a zero stride, a size that overflows, or a span that is not readable.
    pub fn new(
        mem: &'a dyn NativeMemory,
        base: u64,
        stride: usize,
        count: usize,
        width: PointerWidth,
    ) -> Option<Self> {
        if base == 0 || stride == 0 {
            return None;
        }
        let span = stride.checked_mul(count)?;
        base.checked_add(span as u64)?;
        mem.read(base, span)?;

        Some(RecordArray {
            mem,
            base,
            stride,
            count,
            width,
        })
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.count
    }

    /// True if the array holds no records.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The record at `index`, or `None` past the end.
    pub fn get(&self, index: usize) -> Option<Record<'a>> {
        if index >= self.count {
            return None;
        }
        let offset = index.checked_mul(self.stride)? as u64;
        Record::new(self.mem, self.base.checked_add(offset)?, self.stride, self.width)
    }

    /// Iterates the records in order.
    pub fn iter(&self) -> impl Iterator<Item = Option<Record<'a>>> + '_ {
        (0..self.count).map(move |i| self.get(i))
    }
}

/// Reads a NUL-terminated byte string at `addr`, at most `max` bytes long.
///
/// Returns `None` for a null pointer, an unreadable byte, or a string that
/// runs past `max` without a terminator.
pub fn read_c_string(mem: &dyn NativeMemory, addr: u64, max: usize) -> Option<Vec<u8>> {
    if addr == 0 {
        return None;
    }

    let mut out = Vec::new();
    for i in 0..max {
        let byte = *mem.read(addr.checked_add(i as u64)?, 1)?.first()?;
        if byte == 0 {
            return Some(out);
        }
        out.push(byte);
    }
    None
}

/// An owned, relocatable image of native memory.
///
/// The image occupies `[base, base + len)`. Records are placed with
/// [`MemoryImage::alloc`] and filled with the little-endian writers, which
/// makes it a stand-in for real process memory when driving the walker.
#[derive(Clone, Debug, Default)]
pub struct MemoryImage {
    base: u64,
    bytes: Vec<u8>,
}

impl MemoryImage {
    /// Creates an empty image whose first byte lives at `base`.
    pub fn new(base: u64) -> Self {
        MemoryImage {
            base,
            bytes: Vec::new(),
        }
    }

    /// The address of the image's first byte.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Reserves `size` zeroed bytes aligned to `align`, returning their address.
    pub fn alloc(&mut self, size: usize, align: usize) -> u64 {
        let align = align.max(1);
        let padding = (align - self.bytes.len() % align) % align;
        self.bytes.resize(self.bytes.len() + padding, 0);
        let addr = self.base + self.bytes.len() as u64;
        self.bytes.resize(self.bytes.len() + size, 0);
        addr
    }

    /// Copies `data` into the image, returning its address.
    pub fn alloc_bytes(&mut self, data: &[u8]) -> u64 {
        let addr = self.alloc(data.len(), 1);
        self.write(addr, data);
        addr
    }

    /// Copies `s` plus a NUL terminator into the image, returning its address.
    pub fn alloc_c_string(&mut self, s: &str) -> u64 {
        let addr = self.alloc(s.len() + 1, 1);
        self.write(addr, s.as_bytes());
        addr
    }

    /// Overwrites bytes at `addr`. Writes outside the image are ignored.
    pub fn write(&mut self, addr: u64, data: &[u8]) {
        let Some(start) = addr
            .checked_sub(self.base)
            .and_then(|off| usize::try_from(off).ok())
        else {
            return;
        };
        if let Some(dst) = start
            .checked_add(data.len())
            .and_then(|end| self.bytes.get_mut(start..end))
        {
            dst.copy_from_slice(data);
        }
    }

    /// Writes a little-endian `u32` at `addr`.
    pub fn write_u32(&mut self, addr: u64, value: u32) {
        self.write(addr, &value.to_le_bytes());
    }

    /// Writes a pointer of the given width at `addr`.
    pub fn write_ptr(&mut self, addr: u64, value: u64, width: PointerWidth) {
        match width {
            PointerWidth::Bits32 => self.write(addr, &(value as u32).to_le_bytes()),
            PointerWidth::Bits64 => self.write(addr, &value.to_le_bytes()),
        }
    }
}

impl NativeMemory for MemoryImage {
    fn read(&self, addr: u64, len: usize) -> Option<&[u8]> {
        if addr == 0 {
            return None;
        }
        let start = usize::try_from(addr.checked_sub(self.base)?).ok()?;
        self.bytes.get(start..start.checked_add(len)?)
    }
}
