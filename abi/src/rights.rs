//! Access rights carried by bind requests and enforced on map.

use bitflags::bitflags;

bitflags! {
    /// Rights a caller requests when binding memory to a handle.
    ///
    /// The raw bits travel inside command records; `from_bits` rejects
    /// anything a caller sets outside the defined mask.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct MemRights: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

impl MemRights {
    /// Parse caller-supplied bits, rejecting undefined flags.
    pub fn from_wire(bits: u32) -> Option<Self> {
        Self::from_bits(bits)
    }
}
