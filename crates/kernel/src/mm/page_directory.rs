//! Two-level page table walking.
//!
//! This module provides the `PageDirectory` type, which owns the directory and the page tables
//! below it and knows how to find (or create) the entry for a virtual address. It does not know
//! what the leaf entries point at; reference counting of mapped frames is the job of
//! [`super::AddressSpace`].

use alloc::vec::Vec;

use exoabi::{
    FrameNumber, PageEntry, PageFlags, PageNumber, VirtualAddress,
    memlayout::{NPDENTRIES, NPTENTRIES},
};

use super::{
    page_table::PageTable,
    physical_memory::{AllocError, PhysicalMemory},
};

pub struct PageDirectory {
    /// Frame charged for the directory itself.
    frame: FrameNumber,
    /// Directory entries. A present entry names the frame charged for the region's table.
    root: PageTable,
    /// Page tables indexed by directory slot.
    tables: Vec<Option<PageTable>>,
}

impl PageDirectory {
    /// Creates an empty directory, charging one frame for it.
    pub fn new(memory: &mut PhysicalMemory) -> Result<Self, AllocError> {
        let frame = memory.allocate_table()?;
        Ok(Self {
            frame,
            root: PageTable::new(),
            tables: (0..NPDENTRIES).map(|_| None).collect(),
        })
    }

    /// Returns the directory entry for region `pdx`.
    pub fn pde(&self, pdx: usize) -> PageEntry {
        self.root.entry(pdx)
    }

    /// Returns the leaf entry for `page`, or an empty entry if its region has no table.
    pub fn pte(&self, page: PageNumber) -> PageEntry {
        let va = page.start();
        match &self.tables[va.pdx()] {
            Some(table) => table.entry(va.ptx()),
            None => PageEntry::empty(),
        }
    }

    /// Walks to the leaf entry for `va`.
    ///
    /// Returns None if the region has no page table.
    pub fn walk(&mut self, va: VirtualAddress) -> Option<&mut PageEntry> {
        let table = self.tables[va.pdx()].as_mut()?;
        Some(table.entry_mut(va.ptx()))
    }

    /// Walks to the leaf entry for `va`, allocating the region's page table if needed.
    pub fn walk_or_create(
        &mut self,
        memory: &mut PhysicalMemory,
        va: VirtualAddress,
    ) -> Result<&mut PageEntry, AllocError> {
        let pdx = va.pdx();
        if self.tables[pdx].is_none() {
            let frame = memory.allocate_table()?;
            *self.root.entry_mut(pdx) = PageEntry::new(frame, PageFlags::user_writable());
            self.tables[pdx] = Some(PageTable::new());
            log::trace!("page table for region {:#x} in frame {}", pdx, frame);
        }

        let table = self.tables[pdx].get_or_insert_with(PageTable::new);
        Ok(table.entry_mut(va.ptx()))
    }

    /// Iterates over every present leaf entry.
    pub fn mappings(&self) -> impl Iterator<Item = (PageNumber, PageEntry)> + '_ {
        self.tables
            .iter()
            .enumerate()
            .filter_map(|(pdx, table)| table.as_ref().map(|table| (pdx, table)))
            .flat_map(|(pdx, table)| {
                table
                    .present()
                    .map(move |(ptx, entry)| (PageNumber::new(pdx * NPTENTRIES + ptx), entry))
            })
    }

    /// Drops the references held on the directory and table frames.
    ///
    /// Leaf mappings must already have been released.
    pub fn release(self, memory: &mut PhysicalMemory) {
        for (_, pde) in self.root.present() {
            if let Some(frame) = pde.frame() {
                memory.decref(frame);
            }
        }
        memory.decref(self.frame);
    }
}
