//! Fault records delivered to user-level handlers.

use x86_64::structures::idt::PageFaultErrorCode;

use crate::VirtualAddress;

/// General-purpose register snapshot of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Registers {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub eip: u32,
    pub eflags: u32,
    pub esp: u32,
}

impl Registers {
    const WORDS: usize = 10;

    fn words(&self) -> [u32; Self::WORDS] {
        [
            self.edi,
            self.esi,
            self.ebp,
            self.ebx,
            self.edx,
            self.ecx,
            self.eax,
            self.eip,
            self.eflags,
            self.esp,
        ]
    }
}

/// The record the kernel pushes on the exception stack before entering the fault upcall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UTrapframe {
    /// Faulting virtual address.
    pub fault_va: VirtualAddress,
    /// Cause bits.
    pub err: PageFaultErrorCode,
    /// Registers at the time of the fault.
    pub regs: Registers,
}

impl UTrapframe {
    /// Bytes occupied on the exception stack.
    pub const SIZE: usize = 4 * (2 + Registers::WORDS);

    /// Returns true if the faulting access was a write.
    pub fn is_write(&self) -> bool {
        self.err.contains(PageFaultErrorCode::CAUSED_BY_WRITE)
    }

    /// Returns true if the page was present, i.e. the fault is a protection violation rather
    /// than a missing mapping.
    pub fn is_protection_violation(&self) -> bool {
        self.err.contains(PageFaultErrorCode::PROTECTION_VIOLATION)
    }

    /// Lays the record out as it appears on the exception stack: fault address, error code,
    /// then the registers, each as a little-endian 32-bit word.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        let words = [self.fault_va.as_usize() as u32, self.err.bits() as u32]
            .into_iter()
            .chain(self.regs.words());
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cause_bits() {
        let utf = UTrapframe {
            fault_va: VirtualAddress::new(0x0080_0010),
            err: PageFaultErrorCode::PROTECTION_VIOLATION
                | PageFaultErrorCode::CAUSED_BY_WRITE
                | PageFaultErrorCode::USER_MODE,
            regs: Registers::default(),
        };
        assert!(utf.is_write());
        assert!(utf.is_protection_violation());

        let read = UTrapframe {
            err: PageFaultErrorCode::USER_MODE,
            ..utf
        };
        assert!(!read.is_write());
        assert!(!read.is_protection_violation());
    }

    #[test]
    fn stack_layout_starts_with_fault_address() {
        let utf = UTrapframe {
            fault_va: VirtualAddress::new(0xDEAD_B000),
            err: PageFaultErrorCode::CAUSED_BY_WRITE,
            regs: Registers {
                esp: 0xEEBF_DFF0,
                ..Registers::default()
            },
        };
        let bytes = utf.to_bytes();
        assert_eq!(&bytes[0..4], &0xDEAD_B000u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &2u32.to_le_bytes());
        assert_eq!(&bytes[UTrapframe::SIZE - 4..], &0xEEBF_DFF0u32.to_le_bytes());
    }
}
