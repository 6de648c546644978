//! Address types for user virtual memory and emulated physical memory.
//!
//! Both address spaces are 32 bits wide, matching the two-level paging model described in
//! [`crate::memlayout`]. The newtypes exist so that a frame address can never be passed where a
//! user virtual address is expected.

use core::fmt;
use core::ops::{Add, Sub};

use crate::memlayout::{PDXSHIFT, PGSIZE, PTXSHIFT};
use crate::{FrameNumber, PageNumber};

/// Largest representable address (inclusive).
pub const MAX_ADDRESS: usize = 0xFFFF_FFFF;

/// Macro to define common address type functionality.
///
/// This macro generates the basic structure and methods common to both physical
/// and virtual address types, reducing code duplication.
macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new address.
            ///
            /// # Panics
            ///
            /// Panics if the address does not fit in 32 bits.
            #[inline]
            pub const fn new(addr: usize) -> Self {
                assert!(addr <= MAX_ADDRESS, "address exceeds 32 bits");
                Self(addr)
            }

            /// Creates an address, returning `None` if it does not fit in 32 bits.
            #[inline]
            pub const fn try_new(addr: usize) -> Option<Self> {
                if addr <= MAX_ADDRESS {
                    Some(Self(addr))
                } else {
                    None
                }
            }

            /// Returns the raw address value.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Checks if the address is aligned to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                self.0 & (align - 1) == 0
            }

            /// Returns true if the address sits on a page boundary.
            #[inline]
            pub const fn is_page_aligned(self) -> bool {
                self.is_aligned(PGSIZE)
            }

            /// Aligns the address down to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self(self.0 & !(align - 1))
            }

            /// Aligns the address up to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two, or if the result does not fit in 32 bits.
            #[inline]
            pub const fn align_up(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self::new((self.0 + align - 1) & !(align - 1))
            }

            /// Returns the offset of this address within its page.
            #[inline]
            pub const fn page_offset(self) -> usize {
                self.0 & (PGSIZE - 1)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#010x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#010x}", self.0)
            }
        }

        impl From<u32> for $name {
            #[inline]
            fn from(addr: u32) -> Self {
                Self(addr as usize)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self::new(self.0 + rhs)
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: usize) -> Self::Output {
                Self::new(self.0 - rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_address_common!(
    PhysicalAddress,
    "An address in emulated physical memory.\n\n\
     Physical addresses are only meaningful to the kernel; user code sees frames only through\n\
     the frame number stored in a page table entry."
);

impl PhysicalAddress {
    /// Returns the frame containing this address.
    #[inline]
    pub const fn frame_number(self) -> FrameNumber {
        FrameNumber::new(self.0 / PGSIZE)
    }
}

impl_address_common!(
    VirtualAddress,
    "A user virtual address.\n\n\
     Provides the page-directory and page-table indices used by the two-level paging model."
);

impl VirtualAddress {
    /// Returns the page-directory index (the 4 MiB region) of this address.
    #[inline]
    pub const fn pdx(self) -> usize {
        (self.0 >> PDXSHIFT) & 0x3FF
    }

    /// Returns the page-table index within the region.
    #[inline]
    pub const fn ptx(self) -> usize {
        (self.0 >> PTXSHIFT) & 0x3FF
    }

    /// Returns the page containing this address.
    #[inline]
    pub const fn page_number(self) -> PageNumber {
        PageNumber::new(self.0 / PGSIZE)
    }
}
