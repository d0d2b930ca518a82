//! The UEFI stage's hand-off surface.
//!
//! Spec §1 puts the UEFI stage's own file I/O and graphics setup out of this
//! repository's core scope — they are external collaborators. What the core
//! *does* depend on is the shape of the memory map the firmware hands back
//! from `GetMemoryMap` and the [`LoaderBlock`](aurora_core::boot::LoaderBlock)
//! the boot loader assembles from it before jumping to the kernel (spec
//! §4.1, §6). This crate covers exactly that seam: the UEFI memory
//! descriptor type, and the conversion into the kernel's own memory
//! descriptor tag vocabulary.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

pub mod memory;

pub use memory::{EfiMemoryAttributes, EfiMemoryDescriptor, EfiMemoryType};
