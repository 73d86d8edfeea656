use std::collections::BTreeMap;
use std::ffi::CStr;
use std::fmt;
use std::time::SystemTime;

/// Bumped whenever a field is added to or removed from [`PacketMetadata`].
pub const METADATA_VERSION: u16 = 1;

/// Identifier of a packet awaiting a verdict on one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketId(pub u32);

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PacketId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

// ==========================================
// Kernel-supplied packet metadata
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketMetadata {
    pub version: u16,
    pub id: PacketId,

    pub payload_len: usize,
    pub original_len: usize, // before copy-range truncation

    pub nfmark: u32,
    pub timestamp: Option<SystemTime>,

    // Interface indices, 0 when unknown at this hook
    pub indev: u32,
    pub outdev: u32,
    pub physindev: u32,
    pub physoutdev: u32,

    pub hw_addr: Option<Vec<u8>>,
    pub hw_protocol: u16,
    pub hook: u8,

    pub uid: Option<u32>,
    pub gid: Option<u32>,

    /// Kernel-version specific fields without a dedicated slot.
    pub extras: BTreeMap<String, String>,
}

impl PacketMetadata {
    /// Metadata with only the identifier set, as far as a delivery without
    /// kernel attributes can describe it.
    pub fn new(id: impl Into<PacketId>) -> Self {
        Self {
            version: METADATA_VERSION,
            id: id.into(),
            payload_len: 0,
            original_len: 0,
            nfmark: 0,
            timestamp: None,
            indev: 0,
            outdev: 0,
            physindev: 0,
            physoutdev: 0,
            hw_addr: None,
            hw_protocol: 0,
            hook: 0,
            uid: None,
            gid: None,
            extras: BTreeMap::new(),
        }
    }

    pub fn indev_name(&self) -> Option<String> {
        interface_name(self.indev)
    }

    pub fn outdev_name(&self) -> Option<String> {
        interface_name(self.outdev)
    }

    pub fn physindev_name(&self) -> Option<String> {
        interface_name(self.physindev)
    }

    pub fn physoutdev_name(&self) -> Option<String> {
        interface_name(self.physoutdev)
    }
}

/// Resolves an interface index to its name. Index 0 never names an interface.
pub fn interface_name(index: u32) -> Option<String> {
    if index == 0 {
        return None;
    }

    let mut buf = [0 as libc::c_char; libc::IF_NAMESIZE];
    let ret = unsafe { libc::if_indextoname(index, buf.as_mut_ptr()) };
    if ret.is_null() {
        return None;
    }

    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Some(name.to_string_lossy().into_owned())
}
