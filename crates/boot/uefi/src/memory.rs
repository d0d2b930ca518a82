//! UEFI memory map types and their conversion into the kernel's own memory
//! descriptor vocabulary.
//!
//! # Memory map stride
//!
//! When iterating over descriptors returned by `GetMemoryMap`, callers
//! **must** use the firmware's reported `descriptor_size` as the stride
//! between entries, not `size_of::<EfiMemoryDescriptor>()` — the firmware is
//! free to return descriptors larger than this struct.

use aurora_core::boot::MemoryDescriptorKind;
use bitflags::bitflags;

/// The type of a memory region as reported by UEFI's `GetMemoryMap`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EfiMemoryType {
    /// Not usable.
    ReservedMemoryType = 0,
    /// The code portions of a loaded UEFI application.
    LoaderCode = 1,
    /// The data portions of a loaded UEFI application.
    LoaderData = 2,
    /// The code portions of a loaded UEFI Boot Services driver.
    BootServicesCode = 3,
    /// The data portions of a loaded UEFI Boot Services driver.
    BootServicesData = 4,
    /// The code portions of a loaded UEFI Runtime Services driver.
    RuntimeServicesCode = 5,
    /// The data portions of a loaded UEFI Runtime Services driver.
    RuntimeServicesData = 6,
    /// Free (unallocated) memory.
    ConventionalMemory = 7,
    /// Memory in which errors have been detected.
    UnusableMemory = 8,
    /// Memory that holds the ACPI tables, reclaimable once they are parsed.
    AcpiReclaimMemory = 9,
    /// Address space reserved for firmware use, must never be reclaimed.
    AcpiMemoryNvs = 10,
    /// A memory-mapped I/O region.
    MemoryMappedIO = 11,
    /// System memory-mapped I/O port space.
    MemoryMappedIOPortSpace = 12,
    /// Address space reserved by firmware for processor-resident code.
    PalCode = 13,
    /// Byte-addressable non-volatile memory.
    PersistentMemory = 14,
    /// Memory not yet accepted by the underlying isolation architecture.
    UnacceptedMemoryType = 15,
    /// A type this crate does not recognize; carried through unchanged so a
    /// future firmware revision cannot turn into a silent misclassification.
    Unknown(u32),
}

impl EfiMemoryType {
    /// Decodes the raw `u32` a descriptor carries.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::ReservedMemoryType,
            1 => Self::LoaderCode,
            2 => Self::LoaderData,
            3 => Self::BootServicesCode,
            4 => Self::BootServicesData,
            5 => Self::RuntimeServicesCode,
            6 => Self::RuntimeServicesData,
            7 => Self::ConventionalMemory,
            8 => Self::UnusableMemory,
            9 => Self::AcpiReclaimMemory,
            10 => Self::AcpiMemoryNvs,
            11 => Self::MemoryMappedIO,
            12 => Self::MemoryMappedIOPortSpace,
            13 => Self::PalCode,
            14 => Self::PersistentMemory,
            15 => Self::UnacceptedMemoryType,
            other => Self::Unknown(other),
        }
    }

    /// Maps this firmware-defined type onto the kernel's own memory
    /// descriptor tag (spec §3, §4.1).
    ///
    /// `LoaderCode`/`LoaderData` become [`MemoryDescriptorKind::LoadedProgram`]
    /// — the loader's own image and the kernel/boot modules it staged are
    /// indistinguishable at this layer, and both outlive the loader. Boot
    /// Services regions are [`MemoryDescriptorKind::Temporary`]: reclaimable
    /// once the kernel has consumed anything it pointed to. Runtime Services
    /// regions become [`MemoryDescriptorKind::SystemReserved`] since calling
    /// back into firmware runtime services is out of this kernel's scope.
    #[must_use]
    pub const fn to_kernel_kind(self) -> MemoryDescriptorKind {
        match self {
            Self::ConventionalMemory => MemoryDescriptorKind::Free,
            Self::LoaderCode | Self::LoaderData => MemoryDescriptorKind::LoadedProgram,
            Self::BootServicesCode | Self::BootServicesData => {
                MemoryDescriptorKind::Temporary
            }
            Self::AcpiReclaimMemory => MemoryDescriptorKind::FirmwareTemporary,
            Self::AcpiMemoryNvs => MemoryDescriptorKind::FirmwarePermanent,
            Self::RuntimeServicesCode
            | Self::RuntimeServicesData
            | Self::MemoryMappedIO
            | Self::MemoryMappedIOPortSpace
            | Self::PalCode
            | Self::ReservedMemoryType
            | Self::UnusableMemory
            | Self::UnacceptedMemoryType
            | Self::Unknown(_) => MemoryDescriptorKind::SystemReserved,
            // Persistent memory is neither ordinary RAM nor MMIO; until a
            // driver claims it, the safest classification is "leave alone".
            Self::PersistentMemory => MemoryDescriptorKind::SystemReserved,
        }
    }
}

/// A descriptor for a region of physical memory, as returned by
/// `GetMemoryMap`.
///
/// # Layout note
///
/// The firmware may return descriptors larger than this struct; always use
/// the `descriptor_size` value from `GetMemoryMap` as the stride between
/// entries, never `size_of::<EfiMemoryDescriptor>()`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EfiMemoryDescriptor {
    /// The raw type of this memory region; decode with [`EfiMemoryType::from_raw`].
    pub memory_type: u32,
    /// The physical address of the first byte in the region.
    pub physical_start: u64,
    /// The virtual address of the first byte in the region.
    pub virtual_start: u64,
    /// The number of 4 KiB pages in the region.
    pub number_of_pages: u64,
    /// Capability bit mask for this region; see [`EfiMemoryAttributes`].
    pub attribute: u64,
}

bitflags! {
    /// Memory attribute flags carried by an [`EfiMemoryDescriptor`].
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EfiMemoryAttributes: u64 {
        /// Uncacheable.
        const UC = 0x0000_0000_0000_0001;
        /// Write combining.
        const WC = 0x0000_0000_0000_0002;
        /// Write through.
        const WT = 0x0000_0000_0000_0004;
        /// Write back.
        const WB = 0x0000_0000_0000_0008;
        /// Uncacheable, exported.
        const UCE = 0x0000_0000_0000_0010;
        /// Write protected.
        const WP = 0x0000_0000_0000_1000;
        /// Read protected.
        const RP = 0x0000_0000_0000_2000;
        /// Execute protected.
        const XP = 0x0000_0000_0000_4000;
        /// Non-volatile.
        const NV = 0x0000_0000_0000_8000;
        /// More reliable than other memory.
        const MORE_RELIABLE = 0x0000_0000_0001_0000;
        /// Supports read-only protection.
        const RO = 0x0000_0000_0002_0000;
        /// Specific-purpose memory.
        const SP = 0x0000_0000_0004_0000;
        /// Capable of CPU cryptographic protection.
        const CPU_CRYPTO = 0x0000_0000_0008_0000;
        /// Needs a virtual mapping from `SetVirtualAddressMap`.
        const RUNTIME = 0x8000_0000_0000_0000;
    }
}

impl EfiMemoryDescriptor {
    /// Decodes [`Self::memory_type`] into an [`EfiMemoryType`].
    #[must_use]
    pub const fn kind(&self) -> EfiMemoryType {
        EfiMemoryType::from_raw(self.memory_type)
    }

    /// The half-open page range `[base_page, base_page + page_count)` this
    /// descriptor covers, in 4 KiB pages.
    #[must_use]
    pub const fn page_range(&self) -> (u64, u64) {
        (self.physical_start / 4096, self.number_of_pages)
    }
}

const _: () = {
    assert!(core::mem::size_of::<EfiMemoryDescriptor>() == 40);
    assert!(core::mem::offset_of!(EfiMemoryDescriptor, memory_type) == 0);
    assert!(core::mem::offset_of!(EfiMemoryDescriptor, physical_start) == 8);
    assert!(core::mem::offset_of!(EfiMemoryDescriptor, virtual_start) == 16);
    assert!(core::mem::offset_of!(EfiMemoryDescriptor, number_of_pages) == 24);
    assert!(core::mem::offset_of!(EfiMemoryDescriptor, attribute) == 32);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conventional_memory_becomes_free() {
        assert_eq!(
            EfiMemoryType::ConventionalMemory.to_kernel_kind(),
            MemoryDescriptorKind::Free
        );
    }

    #[test]
    fn loader_regions_become_loaded_program() {
        assert_eq!(
            EfiMemoryType::LoaderCode.to_kernel_kind(),
            MemoryDescriptorKind::LoadedProgram
        );
        assert_eq!(
            EfiMemoryType::LoaderData.to_kernel_kind(),
            MemoryDescriptorKind::LoadedProgram
        );
    }

    #[test]
    fn boot_services_regions_are_temporary() {
        assert_eq!(
            EfiMemoryType::BootServicesCode.to_kernel_kind(),
            MemoryDescriptorKind::Temporary
        );
        assert_eq!(
            EfiMemoryType::BootServicesData.to_kernel_kind(),
            MemoryDescriptorKind::Temporary
        );
    }

    #[test]
    fn acpi_reclaim_and_nvs_are_distinct() {
        assert_eq!(
            EfiMemoryType::AcpiReclaimMemory.to_kernel_kind(),
            MemoryDescriptorKind::FirmwareTemporary
        );
        assert_eq!(
            EfiMemoryType::AcpiMemoryNvs.to_kernel_kind(),
            MemoryDescriptorKind::FirmwarePermanent
        );
    }

    #[test]
    fn runtime_services_and_mmio_are_system_reserved() {
        assert_eq!(
            EfiMemoryType::RuntimeServicesCode.to_kernel_kind(),
            MemoryDescriptorKind::SystemReserved
        );
        assert_eq!(
            EfiMemoryType::MemoryMappedIO.to_kernel_kind(),
            MemoryDescriptorKind::SystemReserved
        );
    }

    #[test]
    fn unknown_raw_type_round_trips_and_is_reserved() {
        let decoded = EfiMemoryType::from_raw(0xFFFF_0000);
        assert_eq!(decoded, EfiMemoryType::Unknown(0xFFFF_0000));
        assert_eq!(decoded.to_kernel_kind(), MemoryDescriptorKind::SystemReserved);
    }

    #[test]
    fn page_range_divides_by_page_size() {
        let descriptor = EfiMemoryDescriptor {
            memory_type: EfiMemoryType::ConventionalMemory as u32,
            physical_start: 0x10_0000,
            virtual_start: 0,
            number_of_pages: 16,
            attribute: EfiMemoryAttributes::WB.bits(),
        };
        assert_eq!(descriptor.page_range(), (0x100, 16));
    }
}
