//! One level of the two-level paging structure.

use alloc::boxed::Box;

use exoabi::{PageEntry, memlayout::NPTENTRIES};

/// A page table or page directory: 1024 entries.
///
/// The entries live on the kernel heap. The frame a table is charged to is tracked by whoever
/// owns the table, since emulated user code never dereferences it.
pub struct PageTable {
    entries: Box<[PageEntry; NPTENTRIES]>,
}

impl PageTable {
    /// Creates a new, empty page table.
    ///
    /// All entries are initialized to zero (not present).
    pub fn new() -> Self {
        Self {
            entries: Box::new([PageEntry::empty(); NPTENTRIES]),
        }
    }

    /// Returns the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 1024.
    pub fn entry(&self, index: usize) -> PageEntry {
        assert!(index < NPTENTRIES, "page table index out of bounds");
        self.entries[index]
    }

    /// Returns a mutable reference to the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 1024.
    pub fn entry_mut(&mut self, index: usize) -> &mut PageEntry {
        assert!(index < NPTENTRIES, "page table index out of bounds");
        &mut self.entries[index]
    }

    /// Iterates over the present entries together with their indices.
    pub fn present(&self) -> impl Iterator<Item = (usize, PageEntry)> + '_ {
        self.entries
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, entry)| entry.is_present())
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}
