/// Holds metadata for a physical memory frame.
///
/// Modeled after the `struct PageInfo` of classic teaching kernels: a handful of state flags and
/// the number of page-table entries (or page directories) that refer to the frame.
#[derive(Debug, Default)]
pub struct Frame {
    /// Flags identifying the state of this frame.
    pub flags: FrameFlags,
    refs: u32,
}

impl Frame {
    /// Number of mappings referring to this frame.
    pub fn refs(&self) -> u32 {
        self.refs
    }

    /// Adds a reference and returns the new count, or `None` if the count is saturated.
    pub fn incref(&mut self) -> Option<u32> {
        self.refs = self.refs.checked_add(1)?;
        Some(self.refs)
    }

    #[cfg(test)]
    pub(crate) fn set_refs(&mut self, refs: u32) {
        self.refs = refs;
    }

    /// Drops a reference and returns the new count.
    ///
    /// # Panics
    /// Panics if the frame has no references.
    pub fn decref(&mut self) -> u32 {
        assert!(self.refs > 0, "frame reference count underflow");
        self.refs -= 1;
        self.refs
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FrameFlag {
    /// Frame is allocated.
    Allocated = 1 << 0,
    /// Frame is reserved and should not be allocated.
    Reserved = 1 << 1,
    /// Frame holds a page table or page directory rather than user data.
    PageTable = 1 << 2,
}

/// State flags for a physical memory frame.
///
/// Frame metadata lives behind the kernel lock, so plain integers suffice.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Sets the given flag.
    pub fn set(&mut self, flag: FrameFlag) {
        self.0 |= flag as u8;
    }

    /// Tests if the given flag is set.
    pub fn test(&self, flag: FrameFlag) -> bool {
        self.0 & (flag as u8) != 0
    }

    /// Clears every flag.
    pub fn reset(&mut self) {
        self.0 = 0;
    }
}
