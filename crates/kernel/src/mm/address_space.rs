//! Address space management.
//!
//! An address space is one environment's view of memory: a page directory whose leaf entries
//! each hold a reference on the frame they map.

use exoabi::{FrameNumber, PageEntry, PageFlags, PageNumber, VirtualAddress};

use super::{
    page_directory::PageDirectory,
    physical_memory::{AllocError, PhysicalMemory},
};

pub struct AddressSpace {
    directory: PageDirectory,
}

impl AddressSpace {
    /// Creates an empty address space.
    pub fn new(memory: &mut PhysicalMemory) -> Result<Self, AllocError> {
        Ok(Self {
            directory: PageDirectory::new(memory)?,
        })
    }

    /// Returns the directory entry for region `pdx`.
    pub fn pde(&self, pdx: usize) -> PageEntry {
        self.directory.pde(pdx)
    }

    /// Returns the leaf entry for `page`.
    pub fn pte(&self, page: PageNumber) -> PageEntry {
        self.directory.pte(page)
    }

    /// Returns the frame and flags mapped at `va`, if any.
    pub fn lookup(&self, va: VirtualAddress) -> Option<(FrameNumber, PageFlags)> {
        let entry = self.directory.pte(va.page_number());
        entry.frame().map(|frame| (frame, entry.flags()))
    }

    /// Returns the present leaf entry for `va`, for the MMU to update accessed and dirty bits.
    pub fn entry_mut(&mut self, va: VirtualAddress) -> Option<&mut PageEntry> {
        self.directory.walk(va).filter(|entry| entry.is_present())
    }

    /// Maps `frame` at `va`, replacing whatever was mapped there.
    ///
    /// The new reference is taken before the old mapping is dropped, so re-inserting the frame
    /// that is already mapped (to change its permissions) never frees it. If the frame cannot
    /// take another reference, the existing mapping is left untouched.
    pub fn insert(
        &mut self,
        memory: &mut PhysicalMemory,
        va: VirtualAddress,
        frame: FrameNumber,
        flags: PageFlags,
    ) -> Result<(), AllocError> {
        let entry = self.directory.walk_or_create(memory, va)?;
        memory.incref(frame)?;
        let old = entry.frame();
        *entry = PageEntry::new(frame, flags);
        if let Some(old) = old {
            memory.decref(old);
        }
        Ok(())
    }

    /// Unmaps `va`, returning the frame that was mapped there.
    pub fn remove(
        &mut self,
        memory: &mut PhysicalMemory,
        va: VirtualAddress,
    ) -> Option<FrameNumber> {
        let entry = self.directory.walk(va)?;
        let frame = entry.frame()?;
        entry.clear();
        memory.decref(frame);
        Some(frame)
    }

    /// Number of pages currently mapped.
    pub fn mapped_pages(&self) -> usize {
        self.directory.mappings().count()
    }

    /// Unmaps everything and releases the paging structures.
    pub fn teardown(self, memory: &mut PhysicalMemory) {
        for (_, entry) in self.directory.mappings() {
            if let Some(frame) = entry.frame() {
                memory.decref(frame);
            }
        }
        self.directory.release(memory);
    }
}
