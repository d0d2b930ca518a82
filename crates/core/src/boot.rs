//! Boot loader hand-off contract.
//!
//! The loader produces exactly one immutable record before jumping to the
//! kernel: the [`LoaderBlock`]. Its layout is byte-exact and crosses the
//! loader/kernel language boundary, so every field is fixed-size and the
//! struct is `#[repr(C)]` with no implicit reordering.

use crate::addr::{PhysAddr, VirtAddr};
use core::fmt;

/// Magic signature identifying a valid [`LoaderBlock`].
pub const LOADER_BLOCK_MAGIC: [u8; 4] = *b"OLDR";

/// The hand-off protocol version this kernel understands.
pub const LOADER_BLOCK_VERSION: u64 = 1;

/// The fixed, byte-exact record the boot loader hands to the kernel.
///
/// Field order matches the external interface exactly: magic, version, the
/// four hand-off pointers, the ACPI version tag, the framebuffer pointer,
/// then width/height/pitch. `_pad0`/`_pad1` are the compiler-inserted
/// alignment gaps before the two 8-byte-aligned fields that follow a
/// smaller one; they are named explicitly so the layout reads the same in
/// Rust as it does in the loader's own struct definition.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct LoaderBlock {
    /// Must equal [`LOADER_BLOCK_MAGIC`].
    pub magic: [u8; 4],
    _pad0: [u8; 4],
    /// Must equal a version this kernel understands.
    pub version: u64,
    /// Head of the ordered, doubly linked memory descriptor list.
    pub memory_descriptor_head: Option<VirtAddr>,
    /// Head of the ordered boot-driver list (opaque to the core; driver
    /// business logic is an external collaborator).
    pub boot_driver_head: Option<VirtAddr>,
    /// Physical address of the ACPI root table (RSDP).
    pub acpi_table: Option<PhysAddr>,
    /// Virtual address of the boot processor record, already populated by
    /// the loader's own bring-up of CPU 0.
    pub boot_processor_record: Option<VirtAddr>,
    /// ACPI root table version: 1 (RSDT) or 2 (XSDT).
    pub acpi_version: u32,
    _pad1: u32,
    /// Virtual address of the framebuffer's back buffer.
    pub framebuffer: Option<VirtAddr>,
    /// Framebuffer width in pixels.
    pub width: u32,
    /// Framebuffer height in pixels.
    pub height: u32,
    /// Framebuffer stride in bytes.
    pub pitch: u32,
}

/// Reasons [`LoaderBlock::validate`] can reject a hand-off record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderBlockError {
    /// `magic` did not equal [`LOADER_BLOCK_MAGIC`].
    BadMagic,
    /// `version` is not one this kernel understands.
    UnsupportedVersion(u64),
}

impl fmt::Display for LoaderBlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "loader block magic mismatch"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported loader block version {v}"),
        }
    }
}

impl LoaderBlock {
    /// Validates `magic` and `version`.
    ///
    /// A mismatch here is an invariant violation (§7 category 2): the
    /// kernel's caller is expected to turn an `Err` into
    /// `fatal_error(BadSystemTable, ..)`, never to attempt recovery.
    pub const fn validate(&self) -> Result<(), LoaderBlockError> {
        if !matches!(self.magic, LOADER_BLOCK_MAGIC) {
            return Err(LoaderBlockError::BadMagic);
        }
        if self.version != LOADER_BLOCK_VERSION {
            return Err(LoaderBlockError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

static_assert_layout();

/// Compile-time layout checks for [`LoaderBlock`], kept next to the struct
/// so a field reorder trips a build error instead of a silent ABI change.
const fn static_assert_layout() {
    assert!(core::mem::offset_of!(LoaderBlock, magic) == 0);
    assert!(core::mem::offset_of!(LoaderBlock, version) == 8);
    assert!(core::mem::offset_of!(LoaderBlock, memory_descriptor_head) == 16);
    assert!(core::mem::offset_of!(LoaderBlock, boot_driver_head) == 24);
    assert!(core::mem::offset_of!(LoaderBlock, acpi_table) == 32);
    assert!(core::mem::offset_of!(LoaderBlock, boot_processor_record) == 40);
    assert!(core::mem::offset_of!(LoaderBlock, acpi_version) == 48);
    assert!(core::mem::offset_of!(LoaderBlock, framebuffer) == 56);
    assert!(core::mem::offset_of!(LoaderBlock, width) == 64);
    assert!(core::mem::offset_of!(LoaderBlock, height) == 68);
    assert!(core::mem::offset_of!(LoaderBlock, pitch) == 72);
}

/// The tag attached to a [`MemoryDescriptorNode`], one of eight kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MemoryDescriptorKind {
    /// Usable RAM, free for the page database's free lists.
    Free = 0,
    /// Reserved for the kernel's own page tables.
    PageMap = 1,
    /// Holds the loaded kernel image or a boot module.
    LoadedProgram = 2,
    /// Holds the linear framebuffer.
    GraphicsBuffer = 3,
    /// Loader-owned scratch memory, reclaimable once the kernel has
    /// snapshotted the lists it points to.
    Temporary = 4,
    /// Firmware-owned memory reclaimable after ACPI table parsing.
    FirmwareTemporary = 5,
    /// Firmware-owned memory that must never be reused (ACPI NVS and
    /// similar).
    FirmwarePermanent = 6,
    /// Reserved by the platform and never handed to the page database.
    SystemReserved = 7,
}

/// One node of the loader's ordered, doubly linked memory descriptor list.
///
/// Describes the half-open page range `[base_page, base_page + page_count)`
/// with a single [`MemoryDescriptorKind`]. The kernel walks this list
/// exactly once at boot to build the page database, then treats the list
/// itself as reclaimable loader memory.
#[repr(C)]
pub struct MemoryDescriptorNode {
    /// Next node, or `None` at the tail.
    pub next: Option<VirtAddr>,
    /// Previous node, or `None` at the head.
    pub prev: Option<VirtAddr>,
    /// What this range is used for.
    pub kind: MemoryDescriptorKind,
    /// First physical page number covered by this descriptor.
    pub base_page: u64,
    /// Number of pages covered by this descriptor.
    pub page_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> LoaderBlock {
        LoaderBlock {
            magic: LOADER_BLOCK_MAGIC,
            _pad0: [0; 4],
            version: LOADER_BLOCK_VERSION,
            memory_descriptor_head: Some(VirtAddr::new(0xFFFF_8000_0010_0000)),
            boot_driver_head: None,
            acpi_table: Some(PhysAddr::new(0x000E_0000)),
            boot_processor_record: Some(VirtAddr::new(0xFFFF_8000_0020_0000)),
            acpi_version: 2,
            _pad1: 0,
            framebuffer: Some(VirtAddr::new(0xFFFF_8000_F000_0000)),
            width: 1280,
            height: 720,
            pitch: 1280 * 4,
        }
    }

    #[test]
    fn validate_accepts_well_formed_block() {
        assert!(sample_block().validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_magic() {
        let mut block = sample_block();
        block.magic = *b"XXXX";
        assert_eq!(block.validate(), Err(LoaderBlockError::BadMagic));
    }

    #[test]
    fn validate_rejects_unsupported_version() {
        let mut block = sample_block();
        block.version = 99;
        assert_eq!(
            block.validate(),
            Err(LoaderBlockError::UnsupportedVersion(99))
        );
    }

    #[test]
    fn field_offsets_are_byte_exact() {
        assert_eq!(core::mem::offset_of!(LoaderBlock, magic), 0);
        assert_eq!(core::mem::offset_of!(LoaderBlock, version), 8);
        assert_eq!(core::mem::offset_of!(LoaderBlock, width), 64);
        assert_eq!(core::mem::offset_of!(LoaderBlock, pitch), 72);
    }
}
