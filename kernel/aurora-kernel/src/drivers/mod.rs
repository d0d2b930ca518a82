//! Driver and debug plumbing (spec §2 layer L8): the consumer surface for
//! everything layers L1-L7 expose, not part of the core execution
//! substrate itself. PCI enumeration, filesystem drivers, and the ACPI AML
//! interpreter's internals are external collaborators the spec explicitly
//! puts out of scope (§1); what lives here is the thin contract those
//! collaborators are handed: interrupt-object registration, the PCI
//! configuration-space accessor, the ACPI root-table pointer the loader
//! block carries, and the earliest boot console.

pub mod acpi;
pub mod early_console;
pub mod irq;
pub mod pci;
