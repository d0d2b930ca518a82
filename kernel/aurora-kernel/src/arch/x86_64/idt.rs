//! Interrupt Descriptor Table: the 256-entry vector table exceptions,
//! software traps, and device interrupts dispatch through (spec §4.6).
//!
//! Grounded in the teacher's `interrupts/dispatch.rs`: a static table of
//! `extern "x86-interrupt"` stub functions (const-generic over their own
//! vector offset, each forwarding into one shared dispatcher) instead of
//! hand-written naked assembly, plus an atomically-swapped handler table
//! so drivers can claim a dynamic vector at runtime (spec §4.6's interrupt
//! object). Exception stubs (vectors 0-31) do not decode the hardware
//! error code separately from the generic frame; the one exception that
//! needs extra state, page faults, reads the faulting address out of CR2
//! instead.

use core::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use aurora_core::panic_code::PanicCode;

use crate::arch::x86_64::gdt::{DOUBLE_FAULT_IST_INDEX, KERNEL_CODE_SELECTOR};
use crate::irql::Irql;
use crate::ke::panic::fatal_error;

/// The frame the CPU pushes before entering an interrupt handler.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InterruptStackFrame {
    /// Instruction pointer at the point of interruption.
    pub instruction_pointer: u64,
    /// Code segment selector at the point of interruption.
    pub code_segment: u64,
    /// RFLAGS at the point of interruption.
    pub cpu_flags: u64,
    /// Stack pointer at the point of interruption.
    pub stack_pointer: u64,
    /// Stack segment selector at the point of interruption.
    pub stack_segment: u64,
}

const GATE_PRESENT: u16 = 1 << 15;
const GATE_TYPE_INTERRUPT: u16 = 0b1110 << 8;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    ist: u8,
    type_attr: u16,
    offset_mid: u16,
    offset_high: u32,
    _reserved: u32,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            ist: 0,
            type_attr: 0,
            offset_mid: 0,
            offset_high: 0,
            _reserved: 0,
        }
    }

    fn set(&mut self, handler: u64, ist: u8, dpl: u8) {
        self.offset_low = handler as u16;
        self.offset_mid = (handler >> 16) as u16;
        self.offset_high = (handler >> 32) as u32;
        self.selector = KERNEL_CODE_SELECTOR;
        self.ist = ist;
        self.type_attr = GATE_PRESENT | GATE_TYPE_INTERRUPT | (u16::from(dpl) << 13);
    }
}

/// Vector assigned to the double-fault handler.
pub const DOUBLE_FAULT_VECTOR: u8 = 8;
/// Vector assigned to the page-fault handler.
pub const PAGE_FAULT_VECTOR: u8 = 14;
/// Vector assigned to the user-visible breakpoint trap (`int3`, DPL 3).
pub const BREAKPOINT_VECTOR: u8 = 3;
/// Vector reserved for the periodic clock interrupt (spec §4.6).
pub const CLOCK_VECTOR: u8 = 32;
/// First vector available for dynamically assigned device interrupts.
pub const FIRST_DYNAMIC_VECTOR: u8 = 33;
/// Last vector available for dynamically assigned device interrupts.
pub const LAST_DYNAMIC_VECTOR: u8 = 253;
/// Vector reserved for inter-processor interrupts (spec §4.6 IPI).
pub const IPI_VECTOR: u8 = 254;
/// Vector reserved for the Local APIC's spurious-interrupt sink.
pub const SPURIOUS_VECTOR: u8 = 255;

const NUM_EXCEPTION_VECTORS: usize = 32;
const NUM_DEVICE_VECTORS: usize = 224;

/// Last faulting address observed by the page-fault handler, stashed for
/// the fault-resolution path (spec §7 category 3: "page fault ... with no
/// handler able to resolve it" still needs the address to try resolving it
/// first).
static LAST_FAULT_ADDRESS: AtomicU64 = AtomicU64::new(0);

/// Returns the faulting address from the most recent page fault on this
/// call path.
#[must_use]
pub fn last_fault_address() -> u64 {
    LAST_FAULT_ADDRESS.load(Ordering::Relaxed)
}

fn read_cr2() -> u64 {
    let value: u64;
    // SAFETY: MOV from CR2 has no side effects.
    unsafe {
        core::arch::asm!("mov {}, cr2", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

/// Shared CPU-exception dispatch, called from every exception stub with its
/// own vector baked in at compile time.
fn exception_dispatch(vector: u8) {
    match vector {
        v if v == PAGE_FAULT_VECTOR => {
            LAST_FAULT_ADDRESS.store(read_cr2(), Ordering::Relaxed);
            fatal_error(PanicCode::PageFaultNotHandled, read_cr2(), 0, 0, 0);
        }
        v if v == DOUBLE_FAULT_VECTOR => {
            fatal_error(PanicCode::ExceptionNotHandled, u64::from(vector), 0, 0, 0);
        }
        v if v == BREAKPOINT_VECTOR => {
            // A debugger stub would resolve this; without one it is simply
            // not handled.
            fatal_error(PanicCode::TrapNotHandled, u64::from(vector), 0, 0, 0);
        }
        _ => fatal_error(PanicCode::ExceptionNotHandled, u64::from(vector), 0, 0, 0),
    }
}

macro_rules! make_exc_stub {
    ($offset:expr) => {{
        extern "x86-interrupt" fn stub(_frame: InterruptStackFrame) {
            exception_dispatch($offset);
        }
        stub as ExcStubFn
    }};
}

type ExcStubFn = extern "x86-interrupt" fn(InterruptStackFrame);

#[allow(clippy::declare_interior_mutable_const)]
static EXC_STUBS: [ExcStubFn; NUM_EXCEPTION_VECTORS] = [
    make_exc_stub!(0),
    make_exc_stub!(1),
    make_exc_stub!(2),
    make_exc_stub!(3),
    make_exc_stub!(4),
    make_exc_stub!(5),
    make_exc_stub!(6),
    make_exc_stub!(7),
    make_exc_stub!(8),
    make_exc_stub!(9),
    make_exc_stub!(10),
    make_exc_stub!(11),
    make_exc_stub!(12),
    make_exc_stub!(13),
    make_exc_stub!(14),
    make_exc_stub!(15),
    make_exc_stub!(16),
    make_exc_stub!(17),
    make_exc_stub!(18),
    make_exc_stub!(19),
    make_exc_stub!(20),
    make_exc_stub!(21),
    make_exc_stub!(22),
    make_exc_stub!(23),
    make_exc_stub!(24),
    make_exc_stub!(25),
    make_exc_stub!(26),
    make_exc_stub!(27),
    make_exc_stub!(28),
    make_exc_stub!(29),
    make_exc_stub!(30),
    make_exc_stub!(31),
];

/// Dynamic (driver-registered) handler table, one atomic slot per vector in
/// [`FIRST_DYNAMIC_VECTOR`]..=[`LAST_DYNAMIC_VECTOR`], indexed from 0.
static DEVICE_HANDLERS: [AtomicPtr<()>; NUM_DEVICE_VECTORS] = {
    const INIT: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());
    [INIT; NUM_DEVICE_VECTORS]
};

/// Errors returned when claiming or releasing a dynamic interrupt vector
/// (spec §4.6's interrupt object lifecycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorError {
    /// `vector` is not in the dynamically assignable range.
    OutOfRange,
    /// The vector already has a registered handler.
    AlreadyRegistered,
    /// No free vector remains at the requested IRQL class.
    Exhausted,
}

/// Reservation bitmap for [`allocate_vector`], tracked separately from
/// [`DEVICE_HANDLERS`] since a caller reserves a vector before it has a
/// handler ready to register on it.
static RESERVED_VECTORS: [core::sync::atomic::AtomicBool; NUM_DEVICE_VECTORS] = {
    const INIT: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(false);
    [INIT; NUM_DEVICE_VECTORS]
};

/// Number of distinct device IRQL classes a dynamic vector can be requested
/// at (`Irql::DEVICE..Irql::CLOCK`).
const DEVICE_IRQL_CLASSES: u8 = Irql::CLOCK.as_u8() - Irql::DEVICE.as_u8();

/// Picks a free dynamic vector whose priority class corresponds to
/// `irql`, reserving it for the caller (spec §4.6: "picks a free dynamic
/// vector whose priority equals the requested IRQL"). `bus_vector` is not
/// consulted for vector selection; it is the line number a driver later
/// passes to `drivers::irq::HardwareDescriptor` when programming the
/// interrupt controller redirection entry.
///
/// # Errors
///
/// Returns [`VectorError::Exhausted`] if every vector in `irql`'s class is
/// already reserved.
pub fn allocate_vector(bus_vector: u8, irql: Irql) -> Result<u8, VectorError> {
    let _ = bus_vector;
    let class = irql
        .as_u8()
        .saturating_sub(Irql::DEVICE.as_u8())
        .min(DEVICE_IRQL_CLASSES - 1);
    let span = NUM_DEVICE_VECTORS as u8 / DEVICE_IRQL_CLASSES;
    let start = FIRST_DYNAMIC_VECTOR + class * span;
    let end = if class + 1 == DEVICE_IRQL_CLASSES {
        LAST_DYNAMIC_VECTOR
    } else {
        start + span - 1
    };
    for vector in start..=end {
        // SAFETY: not unsafe; `device_index` always succeeds for vectors in
        // this loop's range, both bounded by the dynamic vector range.
        let idx = device_index(vector).expect("vector within dynamic range");
        if RESERVED_VECTORS[idx]
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return Ok(vector);
        }
    }
    Err(VectorError::Exhausted)
}

/// Releases a vector reserved by [`allocate_vector`] and unregisters any
/// handler still installed on it.
pub fn free_vector(vector: u8) {
    if let Some(idx) = device_index(vector) {
        unregister_handler(vector);
        RESERVED_VECTORS[idx].store(false, Ordering::Release);
    }
}

/// Registers `handler` to run whenever `vector` is delivered.
///
/// # Errors
///
/// Returns [`VectorError::OutOfRange`] if `vector` is not a device vector,
/// or [`VectorError::AlreadyRegistered`] if another handler already claimed
/// it.
pub fn register_handler(vector: u8, handler: fn(u8)) -> Result<(), VectorError> {
    let idx = device_index(vector).ok_or(VectorError::OutOfRange)?;
    let ptr = handler as *mut ();
    DEVICE_HANDLERS[idx]
        .compare_exchange(
            core::ptr::null_mut(),
            ptr,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .map(|_| ())
        .map_err(|_| VectorError::AlreadyRegistered)
}

/// Releases a previously registered handler, leaving `vector` unclaimed.
pub fn unregister_handler(vector: u8) {
    if let Some(idx) = device_index(vector) {
        DEVICE_HANDLERS[idx].store(core::ptr::null_mut(), Ordering::Release);
    }
}

fn device_index(vector: u8) -> Option<usize> {
    if (FIRST_DYNAMIC_VECTOR..=LAST_DYNAMIC_VECTOR).contains(&vector) {
        Some((vector - FIRST_DYNAMIC_VECTOR) as usize)
    } else {
        None
    }
}

fn dispatch_interrupt(vector: u8) {
    match vector {
        v if v == CLOCK_VECTOR => {
            crate::ke::ksignal::drain_current_cpu();
            crate::ke::dpc::drain_current_cpu();
            crate::ps::scheduler::on_clock_tick();
        }
        v if v == IPI_VECTOR => {
            crate::ke::ipi::join_requested_routine(aurora_core::id::CpuId::new(
                aurora_core::cpu_local::current_cpu_id(),
            ));
            crate::ke::ksignal::drain_current_cpu();
            crate::ke::dpc::drain_current_cpu();
        }
        v if v == SPURIOUS_VECTOR => {}
        v => {
            if let Some(idx) = device_index(v) {
                let handler = DEVICE_HANDLERS[idx].load(Ordering::Acquire);
                if !handler.is_null() {
                    // SAFETY: only ever stored by `register_handler`, which
                    // requires a real `fn(u8)`.
                    let f: fn(u8) = unsafe { core::mem::transmute(handler) };
                    f(v);
                }
            }
        }
    }
    crate::arch::x86_64::hw::local_apic::send_eoi();
}

macro_rules! make_stub {
    ($offset:expr) => {{
        extern "x86-interrupt" fn stub(_frame: InterruptStackFrame) {
            dispatch_interrupt($offset + 32);
        }
        stub as ExcStubFn
    }};
}

#[allow(clippy::declare_interior_mutable_const)]
static STUBS: [ExcStubFn; NUM_DEVICE_VECTORS] = [
    make_stub!(0),
    make_stub!(1),
    make_stub!(2),
    make_stub!(3),
    make_stub!(4),
    make_stub!(5),
    make_stub!(6),
    make_stub!(7),
    make_stub!(8),
    make_stub!(9),
    make_stub!(10),
    make_stub!(11),
    make_stub!(12),
    make_stub!(13),
    make_stub!(14),
    make_stub!(15),
    make_stub!(16),
    make_stub!(17),
    make_stub!(18),
    make_stub!(19),
    make_stub!(20),
    make_stub!(21),
    make_stub!(22),
    make_stub!(23),
    make_stub!(24),
    make_stub!(25),
    make_stub!(26),
    make_stub!(27),
    make_stub!(28),
    make_stub!(29),
    make_stub!(30),
    make_stub!(31),
    make_stub!(32),
    make_stub!(33),
    make_stub!(34),
    make_stub!(35),
    make_stub!(36),
    make_stub!(37),
    make_stub!(38),
    make_stub!(39),
    make_stub!(40),
    make_stub!(41),
    make_stub!(42),
    make_stub!(43),
    make_stub!(44),
    make_stub!(45),
    make_stub!(46),
    make_stub!(47),
    make_stub!(48),
    make_stub!(49),
    make_stub!(50),
    make_stub!(51),
    make_stub!(52),
    make_stub!(53),
    make_stub!(54),
    make_stub!(55),
    make_stub!(56),
    make_stub!(57),
    make_stub!(58),
    make_stub!(59),
    make_stub!(60),
    make_stub!(61),
    make_stub!(62),
    make_stub!(63),
    make_stub!(64),
    make_stub!(65),
    make_stub!(66),
    make_stub!(67),
    make_stub!(68),
    make_stub!(69),
    make_stub!(70),
    make_stub!(71),
    make_stub!(72),
    make_stub!(73),
    make_stub!(74),
    make_stub!(75),
    make_stub!(76),
    make_stub!(77),
    make_stub!(78),
    make_stub!(79),
    make_stub!(80),
    make_stub!(81),
    make_stub!(82),
    make_stub!(83),
    make_stub!(84),
    make_stub!(85),
    make_stub!(86),
    make_stub!(87),
    make_stub!(88),
    make_stub!(89),
    make_stub!(90),
    make_stub!(91),
    make_stub!(92),
    make_stub!(93),
    make_stub!(94),
    make_stub!(95),
    make_stub!(96),
    make_stub!(97),
    make_stub!(98),
    make_stub!(99),
    make_stub!(100),
    make_stub!(101),
    make_stub!(102),
    make_stub!(103),
    make_stub!(104),
    make_stub!(105),
    make_stub!(106),
    make_stub!(107),
    make_stub!(108),
    make_stub!(109),
    make_stub!(110),
    make_stub!(111),
    make_stub!(112),
    make_stub!(113),
    make_stub!(114),
    make_stub!(115),
    make_stub!(116),
    make_stub!(117),
    make_stub!(118),
    make_stub!(119),
    make_stub!(120),
    make_stub!(121),
    make_stub!(122),
    make_stub!(123),
    make_stub!(124),
    make_stub!(125),
    make_stub!(126),
    make_stub!(127),
    make_stub!(128),
    make_stub!(129),
    make_stub!(130),
    make_stub!(131),
    make_stub!(132),
    make_stub!(133),
    make_stub!(134),
    make_stub!(135),
    make_stub!(136),
    make_stub!(137),
    make_stub!(138),
    make_stub!(139),
    make_stub!(140),
    make_stub!(141),
    make_stub!(142),
    make_stub!(143),
    make_stub!(144),
    make_stub!(145),
    make_stub!(146),
    make_stub!(147),
    make_stub!(148),
    make_stub!(149),
    make_stub!(150),
    make_stub!(151),
    make_stub!(152),
    make_stub!(153),
    make_stub!(154),
    make_stub!(155),
    make_stub!(156),
    make_stub!(157),
    make_stub!(158),
    make_stub!(159),
    make_stub!(160),
    make_stub!(161),
    make_stub!(162),
    make_stub!(163),
    make_stub!(164),
    make_stub!(165),
    make_stub!(166),
    make_stub!(167),
    make_stub!(168),
    make_stub!(169),
    make_stub!(170),
    make_stub!(171),
    make_stub!(172),
    make_stub!(173),
    make_stub!(174),
    make_stub!(175),
    make_stub!(176),
    make_stub!(177),
    make_stub!(178),
    make_stub!(179),
    make_stub!(180),
    make_stub!(181),
    make_stub!(182),
    make_stub!(183),
    make_stub!(184),
    make_stub!(185),
    make_stub!(186),
    make_stub!(187),
    make_stub!(188),
    make_stub!(189),
    make_stub!(190),
    make_stub!(191),
    make_stub!(192),
    make_stub!(193),
    make_stub!(194),
    make_stub!(195),
    make_stub!(196),
    make_stub!(197),
    make_stub!(198),
    make_stub!(199),
    make_stub!(200),
    make_stub!(201),
    make_stub!(202),
    make_stub!(203),
    make_stub!(204),
    make_stub!(205),
    make_stub!(206),
    make_stub!(207),
    make_stub!(208),
    make_stub!(209),
    make_stub!(210),
    make_stub!(211),
    make_stub!(212),
    make_stub!(213),
    make_stub!(214),
    make_stub!(215),
    make_stub!(216),
    make_stub!(217),
    make_stub!(218),
    make_stub!(219),
    make_stub!(220),
    make_stub!(221),
    make_stub!(222),
    make_stub!(223),
];

static mut IDT: [IdtEntry; 256] = [IdtEntry::missing(); 256];

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u64,
}

/// Builds and loads the IDT: every exception and device vector wired to its
/// generated stub, with the double-fault handler on its own IST stack.
///
/// # Safety
///
/// Must run exactly once, after [`super::gdt::init`], and before interrupts
/// are enabled.
pub unsafe fn init() {
    // SAFETY: single-threaded, one-time boot initialization; `IDT` is not
    // observed by hardware until `lidt` runs at the end of this function.
    unsafe {
        let idt = core::ptr::addr_of_mut!(IDT).as_mut().unwrap();
        for (vector, stub) in EXC_STUBS.iter().enumerate() {
            let ist = if vector as u8 == DOUBLE_FAULT_VECTOR {
                DOUBLE_FAULT_IST_INDEX
            } else {
                0
            };
            let dpl = if vector as u8 == BREAKPOINT_VECTOR { 3 } else { 0 };
            idt[vector].set(*stub as u64, ist, dpl);
        }
        for (offset, stub) in STUBS.iter().enumerate() {
            idt[offset + 32].set(*stub as u64, 0, 0);
        }

        let pointer = DescriptorTablePointer {
            limit: (core::mem::size_of::<[IdtEntry; 256]>() - 1) as u16,
            base: core::ptr::addr_of!(IDT) as u64,
        };
        core::arch::asm!("lidt [{}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_encodes_split_handler_address() {
        let mut entry = IdtEntry::missing();
        entry.set(0xFFFF_8000_ABCD_1234, 0, 0);
        assert_eq!(entry.offset_low, 0x1234);
        assert_eq!(entry.offset_mid, 0xABCD);
        assert_eq!(entry.offset_high, 0xFFFF_8000);
        assert_ne!(entry.type_attr & GATE_PRESENT, 0);
    }

    #[test]
    fn device_index_rejects_out_of_range_vectors() {
        assert_eq!(device_index(0), None);
        assert_eq!(device_index(CLOCK_VECTOR), None);
        assert_eq!(device_index(IPI_VECTOR), None);
        assert!(device_index(FIRST_DYNAMIC_VECTOR).is_some());
        assert!(device_index(LAST_DYNAMIC_VECTOR).is_some());
    }

    #[test]
    fn register_then_unregister_frees_the_vector() {
        fn handler(_vector: u8) {}
        let vector = FIRST_DYNAMIC_VECTOR;
        unregister_handler(vector);
        assert!(register_handler(vector, handler).is_ok());
        assert_eq!(register_handler(vector, handler), Err(VectorError::AlreadyRegistered));
        unregister_handler(vector);
        assert!(register_handler(vector, handler).is_ok());
        unregister_handler(vector);
    }

    #[test]
    fn allocate_vector_picks_higher_vectors_for_higher_irql() {
        let low = allocate_vector(0, Irql::DEVICE).unwrap();
        let high = allocate_vector(0, Irql::device(DEVICE_IRQL_CLASSES - 1)).unwrap();
        assert!(high > low);
        free_vector(low);
        free_vector(high);
    }

    #[test]
    fn allocate_vector_reserves_until_freed() {
        let first = allocate_vector(0, Irql::device(3)).unwrap();
        // Exhaust the rest of this class's span before expecting failure
        // would require iterating the whole span; instead just check the
        // same vector is never handed out twice while still reserved.
        let second = allocate_vector(0, Irql::device(3)).unwrap();
        assert_ne!(first, second);
        free_vector(first);
        free_vector(second);
    }
}
