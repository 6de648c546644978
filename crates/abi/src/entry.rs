//! Page-table and page-directory entries.

use core::fmt;

use crate::{FrameNumber, PageFlags, memlayout::PGSHIFT};

/// A single 32-bit-model paging entry: frame number in bits 12 and up, flags in bits 0-11.
///
/// The same layout is used for page-directory entries, where the frame is the one holding the
/// region's page table.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageEntry(u64);

impl PageEntry {
    /// Frame bits of the entry.
    const ADDRESS_MASK: u64 = 0xFFFF_F000;

    /// Flag bits of the entry.
    const FLAGS_MASK: u64 = 0xFFF;

    /// Creates a new entry pointing at `frame`.
    pub fn new(frame: FrameNumber, flags: PageFlags) -> Self {
        let addr_bits = ((frame.as_usize() as u64) << PGSHIFT) & Self::ADDRESS_MASK;
        Self(addr_bits | (flags.bits() & Self::FLAGS_MASK))
    }

    /// An empty, non-present entry.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns the frame stored in this entry, or `None` if the entry is not present.
    pub fn frame(self) -> Option<FrameNumber> {
        if self.is_present() {
            Some(FrameNumber::new(((self.0 & Self::ADDRESS_MASK) >> PGSHIFT) as usize))
        } else {
            None
        }
    }

    /// Returns the flags for this entry.
    pub fn flags(self) -> PageFlags {
        PageFlags::from_bits_unchecked(self.0 & Self::FLAGS_MASK)
    }

    /// Sets the flags for this entry, preserving the frame.
    pub fn set_flags(&mut self, flags: PageFlags) {
        self.0 = (self.0 & Self::ADDRESS_MASK) | (flags.bits() & Self::FLAGS_MASK);
    }

    /// Returns whether this entry is present.
    pub fn is_present(self) -> bool {
        self.flags().is_present()
    }

    /// Clears this entry.
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Returns the raw entry value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for PageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.frame() {
            Some(frame) => write!(f, "PageEntry({}, {})", frame, self.flags()),
            None => write!(f, "PageEntry(-)"),
        }
    }
}
