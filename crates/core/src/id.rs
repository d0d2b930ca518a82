//! Type-safe identifiers for kernel resources.
//!
//! These newtypes prevent accidental mixing of thread IDs, CPU IDs, IRQ
//! vectors, and object tags at compile time — a stray `u32` can no longer be
//! passed where a `CpuId` was expected.

use core::fmt;

/// Logical CPU identifier (0 for the bootstrap processor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct CpuId(u32);

impl CpuId {
    /// Creates a new `CpuId`.
    pub const fn new(val: u32) -> Self {
        Self(val)
    }

    /// Returns the raw `u32` value.
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the value as `usize` (convenience for array indexing).
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

/// Kernel thread identifier, unique for the lifetime of the thread object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Creates a new `ThreadId`.
    pub const fn new(val: u64) -> Self {
        Self(val)
    }

    /// Returns the raw `u64` value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid:{}", self.0)
    }
}

/// Interrupt vector number (0..255, as delivered by the IDT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct IrqVector(u8);

impl IrqVector {
    /// Creates a new `IrqVector`.
    pub const fn new(val: u8) -> Self {
        Self(val)
    }

    /// Returns the raw `u8` value.
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl fmt::Display for IrqVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vec{}", self.0)
    }
}

/// A four-byte tag identifying the allocator, object type, or pool that owns
/// a piece of memory or a kernel object.
///
/// Tags are conventionally chosen to read as ASCII when printed (e.g.
/// `Tag(*b"Thrd")` for thread objects), mirroring the pool-tag convention
/// used for leak attribution. Kept as a dedicated newtype rather than a bare
/// `u32` so a tag comparison can never be confused with an address or count
/// at the type level.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Tag([u8; 4]);

impl Tag {
    /// Creates a new `Tag` from four raw bytes.
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub const fn as_bytes(self) -> [u8; 4] {
        self.0
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match core::str::from_utf8(&self.0) {
            Ok(s) if s.chars().all(|c| c.is_ascii_graphic()) => write!(f, "Tag({s:?})"),
            _ => write!(f, "Tag({:02x?})", self.0),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match core::str::from_utf8(&self.0) {
            Ok(s) if s.chars().all(|c| c.is_ascii_graphic()) => write!(f, "{s}"),
            _ => write!(f, "{:02x?}", self.0),
        }
    }
}
