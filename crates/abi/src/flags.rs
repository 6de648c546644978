//! Page permission flags.
//!
//! The bit layout is the hardware one provided by the x86_64 crate; copy-on-write lives in bit 11,
//! one of the bits the MMU ignores and leaves to software. Writable and copy-on-write are never set
//! together: every mutation path checks this and reports [`FlagConflict`].

use core::fmt;

use thiserror::Error;
use x86_64::structures::paging::PageTableFlags;

/// Writable and copy-on-write were requested on the same entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("writable and copy-on-write are mutually exclusive")]
pub struct FlagConflict;

/// Permission and status bits of a page-table entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageFlags(PageTableFlags);

impl PageFlags {
    /// The mapping is valid.
    pub const PRESENT: Self = Self(PageTableFlags::PRESENT);
    /// Writes are allowed.
    pub const WRITABLE: Self = Self(PageTableFlags::WRITABLE);
    /// User-mode accesses are allowed.
    pub const USER: Self = Self(PageTableFlags::USER_ACCESSIBLE);
    /// The frame is shared and must be copied before the first write.
    pub const COPY_ON_WRITE: Self = Self(PageTableFlags::BIT_11);
    /// Set by the MMU on any access.
    pub const ACCESSED: Self = Self(PageTableFlags::ACCESSED);
    /// Set by the MMU on a write.
    pub const DIRTY: Self = Self(PageTableFlags::DIRTY);

    /// Bits user code is allowed to pass to the page syscalls.
    pub const SYSCALL_MASK: u64 = PageTableFlags::PRESENT.bits()
        | PageTableFlags::WRITABLE.bits()
        | PageTableFlags::USER_ACCESSIBLE.bits()
        | PageTableFlags::BIT_9.bits()
        | PageTableFlags::BIT_10.bits()
        | PageTableFlags::BIT_11.bits();

    const HARDWARE_MAINTAINED: u64 = PageTableFlags::ACCESSED.bits() | PageTableFlags::DIRTY.bits();

    /// No bits set; the page is not present.
    pub const fn empty() -> Self {
        Self(PageTableFlags::empty())
    }

    /// Present, user, read-only.
    pub const fn user_readonly() -> Self {
        Self(PageTableFlags::from_bits_truncate(
            PageTableFlags::PRESENT.bits() | PageTableFlags::USER_ACCESSIBLE.bits(),
        ))
    }

    /// Present, user, writable.
    pub const fn user_writable() -> Self {
        Self(PageTableFlags::from_bits_truncate(
            PageTableFlags::PRESENT.bits()
                | PageTableFlags::USER_ACCESSIBLE.bits()
                | PageTableFlags::WRITABLE.bits(),
        ))
    }

    /// Present, user, copy-on-write (and therefore not writable).
    pub const fn user_copy_on_write() -> Self {
        Self(PageTableFlags::from_bits_truncate(
            PageTableFlags::PRESENT.bits()
                | PageTableFlags::USER_ACCESSIBLE.bits()
                | PageTableFlags::BIT_11.bits(),
        ))
    }

    /// Builds flags from raw entry bits, ignoring bits that are not flags.
    pub fn from_bits(bits: u64) -> Result<Self, FlagConflict> {
        Self::checked(PageTableFlags::from_bits_truncate(bits))
    }

    /// Builds flags from bits that already passed [`Self::from_bits`] once.
    pub(crate) const fn from_bits_unchecked(bits: u64) -> Self {
        Self(PageTableFlags::from_bits_truncate(bits))
    }

    fn checked(raw: PageTableFlags) -> Result<Self, FlagConflict> {
        if raw.contains(PageTableFlags::WRITABLE) && raw.contains(PageTableFlags::BIT_11) {
            Err(FlagConflict)
        } else {
            Ok(Self(raw))
        }
    }

    /// Returns the raw bits.
    pub const fn bits(self) -> u64 {
        self.0.bits()
    }

    /// Returns the union of both flag sets, refusing to combine writable with copy-on-write.
    pub fn union(self, other: Self) -> Result<Self, FlagConflict> {
        Self::checked(self.0 | other.0)
    }

    /// Returns true if every bit in `other` is also set here.
    pub fn contains(self, other: Self) -> bool {
        self.0.contains(other.0)
    }

    /// Returns whether the present bit is set.
    pub fn is_present(self) -> bool {
        self.0.contains(PageTableFlags::PRESENT)
    }

    /// Returns whether the user-accessible bit is set.
    pub fn is_user(self) -> bool {
        self.0.contains(PageTableFlags::USER_ACCESSIBLE)
    }

    /// Returns whether the writable bit is set.
    pub fn is_writable(self) -> bool {
        self.0.contains(PageTableFlags::WRITABLE)
    }

    /// Sets or clears the writable bit.
    ///
    /// Fails without modifying anything if copy-on-write is set.
    pub fn set_writable(&mut self, writable: bool) -> Result<(), FlagConflict> {
        if writable && self.is_copy_on_write() {
            return Err(FlagConflict);
        }
        self.0.set(PageTableFlags::WRITABLE, writable);
        Ok(())
    }

    /// Returns whether the copy-on-write bit is set.
    pub fn is_copy_on_write(self) -> bool {
        self.0.contains(PageTableFlags::BIT_11)
    }

    /// Sets or clears the copy-on-write bit.
    ///
    /// Fails without modifying anything if writable is set.
    pub fn set_copy_on_write(&mut self, cow: bool) -> Result<(), FlagConflict> {
        if cow && self.is_writable() {
            return Err(FlagConflict);
        }
        self.0.set(PageTableFlags::BIT_11, cow);
        Ok(())
    }

    /// Returns whether the accessed bit is set.
    pub fn is_accessed(self) -> bool {
        self.0.contains(PageTableFlags::ACCESSED)
    }

    /// Returns whether the dirty bit is set.
    pub fn is_dirty(self) -> bool {
        self.0.contains(PageTableFlags::DIRTY)
    }

    /// Records an access, as the MMU does on every translation.
    pub fn mark_accessed(&mut self, write: bool) {
        self.0.insert(PageTableFlags::ACCESSED);
        if write {
            self.0.insert(PageTableFlags::DIRTY);
        }
    }

    /// Returns these flags with the accessed and dirty bits cleared.
    pub fn without_hardware_bits(self) -> Self {
        Self::from_bits_unchecked(self.bits() & !Self::HARDWARE_MAINTAINED)
    }

    /// Returns true if user code may request exactly these bits from a page syscall:
    /// present and user must be set, and nothing outside [`Self::SYSCALL_MASK`].
    pub fn is_valid_syscall_permission(self) -> bool {
        self.is_present() && self.is_user() && self.bits() & !Self::SYSCALL_MASK == 0
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for PageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageFlags({})", self)
    }
}

impl fmt::Display for PageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(PageFlags, &str); 6] = [
            (PageFlags::PRESENT, "P"),
            (PageFlags::USER, "U"),
            (PageFlags::WRITABLE, "W"),
            (PageFlags::COPY_ON_WRITE, "COW"),
            (PageFlags::ACCESSED, "A"),
            (PageFlags::DIRTY, "D"),
        ];

        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("-")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_on_write_is_bit_eleven() {
        assert_eq!(PageFlags::COPY_ON_WRITE.bits(), 0x800);
        assert_eq!(PageFlags::user_copy_on_write().bits(), 0x805);
    }

    #[test]
    fn set_writable_refuses_copy_on_write_page() {
        let mut flags = PageFlags::user_copy_on_write();
        assert_eq!(flags.set_writable(true), Err(FlagConflict));
        assert!(!flags.is_writable());
        assert!(flags.is_copy_on_write());
    }

    #[test]
    fn set_copy_on_write_refuses_writable_page() {
        let mut flags = PageFlags::user_writable();
        assert_eq!(flags.set_copy_on_write(true), Err(FlagConflict));
        assert!(flags.is_writable());

        flags.set_writable(false).unwrap();
        flags.set_copy_on_write(true).unwrap();
        assert_eq!(flags, PageFlags::user_copy_on_write());
    }

    #[test]
    fn clearing_never_conflicts() {
        let mut flags = PageFlags::user_copy_on_write();
        flags.set_writable(false).unwrap();
        flags.set_copy_on_write(false).unwrap();
        assert_eq!(flags, PageFlags::user_readonly());
    }

    #[test]
    fn from_bits_and_union_check_invariant() {
        assert_eq!(PageFlags::from_bits(0x807), Err(FlagConflict));
        assert_eq!(
            PageFlags::user_readonly().union(PageFlags::WRITABLE),
            Ok(PageFlags::user_writable())
        );
        assert_eq!(
            PageFlags::user_writable().union(PageFlags::COPY_ON_WRITE),
            Err(FlagConflict)
        );
    }

    #[test]
    fn syscall_permission_rules() {
        assert!(PageFlags::user_readonly().is_valid_syscall_permission());
        assert!(PageFlags::user_writable().is_valid_syscall_permission());
        assert!(PageFlags::user_copy_on_write().is_valid_syscall_permission());
        assert!(!PageFlags::PRESENT.is_valid_syscall_permission());
        assert!(!PageFlags::USER.is_valid_syscall_permission());

        let mut with_dirty = PageFlags::user_readonly();
        with_dirty.mark_accessed(true);
        assert!(!with_dirty.is_valid_syscall_permission());
        assert!(with_dirty.without_hardware_bits().is_valid_syscall_permission());
    }

    #[test]
    fn accessed_and_dirty() {
        let mut flags = PageFlags::user_writable();
        flags.mark_accessed(false);
        assert!(flags.is_accessed());
        assert!(!flags.is_dirty());
        flags.mark_accessed(true);
        assert!(flags.is_dirty());
        assert_eq!(flags.without_hardware_bits(), PageFlags::user_writable());
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", PageFlags::user_copy_on_write()), "P|U|COW");
        assert_eq!(format!("{}", PageFlags::empty()), "-");
    }
}
