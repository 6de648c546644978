//! Emulated physical memory and the frame allocator.
//!
//! Physical memory is a byte buffer carved into `PGSIZE` frames. Free frames sit on a stack; a
//! frame returns to it when its last reference goes away. Frame 0 is reserved so that a zero frame
//! number in an entry is never a valid mapping.

use alloc::{vec, vec::Vec};

use exoabi::{FrameNumber, SysError, memlayout::PGSIZE};
use thiserror::Error;

use super::frame::{Frame, FrameFlag};

/// Errors that can occur during physical memory allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// Every frame is in use.
    #[error("out of physical frames")]
    OutOfMemory,
    /// The frame cannot take another reference.
    #[error("frame reference count overflow")]
    TooManyReferences,
}

impl From<AllocError> for SysError {
    fn from(err: AllocError) -> Self {
        match err {
            AllocError::OutOfMemory | AllocError::TooManyReferences => SysError::NoMemory,
        }
    }
}

pub struct PhysicalMemory {
    bytes: Vec<u8>,
    frames: Vec<Frame>,
    free: Vec<FrameNumber>,
}

impl PhysicalMemory {
    /// Creates `frame_count` frames of zeroed memory.
    ///
    /// # Panics
    /// Panics if `frame_count` is zero.
    pub fn new(frame_count: usize) -> Self {
        assert!(frame_count > 0, "physical memory needs at least one frame");

        let mut frames: Vec<Frame> = (0..frame_count).map(|_| Frame::default()).collect();
        frames[0].flags.set(FrameFlag::Reserved);

        // Hand out low frames first.
        let free = (1..frame_count).rev().map(FrameNumber::new).collect();

        Self {
            bytes: vec![0u8; frame_count * PGSIZE],
            frames,
            free,
        }
    }

    /// Allocates a zero-filled frame with no references.
    pub fn allocate(&mut self) -> Result<FrameNumber, AllocError> {
        let frame = self.free.pop().ok_or(AllocError::OutOfMemory)?;
        self.bytes_mut(frame).fill(0);
        let meta = &mut self.frames[frame.as_usize()];
        meta.flags.set(FrameFlag::Allocated);
        log::trace!("allocated frame {}", frame);
        Ok(frame)
    }

    /// Allocates a frame to hold a page table or directory. The caller owns one reference.
    pub fn allocate_table(&mut self) -> Result<FrameNumber, AllocError> {
        let frame = self.allocate()?;
        self.frames[frame.as_usize()].flags.set(FrameFlag::PageTable);
        self.incref(frame)?;
        Ok(frame)
    }

    /// Returns an allocated frame with no references to the free stack.
    ///
    /// # Panics
    /// Panics if the frame is reserved, still referenced or was never allocated.
    pub fn free(&mut self, frame: FrameNumber) {
        let meta = &mut self.frames[frame.as_usize()];
        assert!(
            !meta.flags.test(FrameFlag::Reserved),
            "freeing reserved frame {frame}"
        );
        assert!(
            meta.flags.test(FrameFlag::Allocated),
            "freeing unallocated frame {frame}"
        );
        assert_eq!(meta.refs(), 0, "freeing referenced frame {frame}");
        let kind = if meta.flags.test(FrameFlag::PageTable) {
            "page table"
        } else {
            "frame"
        };
        meta.flags.reset();
        self.free.push(frame);
        log::trace!("freed {} {}", kind, frame);
    }

    /// Adds a reference to `frame`.
    pub fn incref(&mut self, frame: FrameNumber) -> Result<(), AllocError> {
        self.frames[frame.as_usize()]
            .incref()
            .map(|_| ())
            .ok_or(AllocError::TooManyReferences)
    }

    /// Drops a reference to `frame`, freeing it when none remain.
    pub fn decref(&mut self, frame: FrameNumber) {
        if self.frames[frame.as_usize()].decref() == 0 {
            self.free(frame);
        }
    }

    /// Number of references to `frame`.
    pub fn refs(&self, frame: FrameNumber) -> u32 {
        self.frames[frame.as_usize()].refs()
    }

    /// Forces the reference count of `frame`.
    #[cfg(test)]
    pub(crate) fn set_refs(&mut self, frame: FrameNumber, refs: u32) {
        self.frames[frame.as_usize()].set_refs(refs);
    }

    /// Number of frames available for allocation.
    pub fn free_frames(&self) -> usize {
        self.free.len()
    }

    /// Mutable contents of `frame`.
    pub fn bytes_mut(&mut self, frame: FrameNumber) -> &mut [u8] {
        let start = frame.start().as_usize();
        &mut self.bytes[start..start + PGSIZE]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_zero_is_never_handed_out() {
        let mut memory = PhysicalMemory::new(3);
        assert_eq!(memory.allocate(), Ok(FrameNumber::new(1)));
        assert_eq!(memory.allocate(), Ok(FrameNumber::new(2)));
        assert_eq!(memory.allocate(), Err(AllocError::OutOfMemory));
    }

    #[test]
    fn allocation_zero_fills() {
        let mut memory = PhysicalMemory::new(2);
        let frame = memory.allocate().unwrap();
        memory.bytes_mut(frame).fill(0xAA);
        memory.incref(frame).unwrap();
        memory.decref(frame);

        let again = memory.allocate().unwrap();
        assert_eq!(again, frame);
        assert!(memory.bytes_mut(again).iter().all(|&b| b == 0));
    }

    #[test]
    fn last_reference_frees() {
        let mut memory = PhysicalMemory::new(4);
        let frame = memory.allocate().unwrap();
        memory.incref(frame).unwrap();
        memory.incref(frame).unwrap();
        assert_eq!(memory.free_frames(), 2);

        memory.decref(frame);
        assert_eq!(memory.refs(frame), 1);
        assert_eq!(memory.free_frames(), 2);

        memory.decref(frame);
        assert_eq!(memory.free_frames(), 3);
    }

    #[test]
    fn table_frames_start_referenced() {
        let mut memory = PhysicalMemory::new(2);
        let frame = memory.allocate_table().unwrap();
        assert_eq!(memory.refs(frame), 1);
        memory.decref(frame);
        assert_eq!(memory.free_frames(), 1);
    }

    #[test]
    #[should_panic(expected = "freeing referenced frame")]
    fn free_referenced_frame_panics() {
        let mut memory = PhysicalMemory::new(2);
        let frame = memory.allocate().unwrap();
        memory.incref(frame).unwrap();
        memory.free(frame);
    }

    #[test]
    #[should_panic(expected = "freeing reserved frame")]
    fn free_reserved_frame_panics() {
        PhysicalMemory::new(2).free(FrameNumber::new(0));
    }

    #[test]
    fn saturated_frame_refuses_references() {
        let mut memory = PhysicalMemory::new(2);
        let frame = memory.allocate().unwrap();
        memory.set_refs(frame, u32::MAX);
        assert_eq!(memory.incref(frame), Err(AllocError::TooManyReferences));
        assert_eq!(memory.refs(frame), u32::MAX);
    }

    #[test]
    fn allocation_errors_map_to_no_memory() {
        assert_eq!(SysError::from(AllocError::OutOfMemory), SysError::NoMemory);
        assert_eq!(
            SysError::from(AllocError::TooManyReferences),
            SysError::NoMemory
        );
    }
}
