//! # Shared Kernel ABI Definitions (perf ↔ Userspace)
//!
//! Defines the `perf_event_open(2)` structures and constants used to drive
//! Intel Processor Trace from userspace. All types use `#[repr(C)]` and mirror
//! `<linux/perf_event.h>` field for field, so they can be handed to the kernel
//! directly or overlaid on pages the kernel maps into our address space.
//!
//! ## Key Types
//!
//! - [`PerfEventAttr`] - Event descriptor passed to `perf_event_open(2)`
//! - [`PerfEventMmapPage`] - Control page at offset 0 of the perf mapping
//!
//! Bitfields in `perf_event_attr` are exposed as `ATTR_FLAG_*` masks over
//! [`PerfEventAttr::flags`].

#![no_std]

// ============================================================================
// Syscall and ioctl Constants
// ============================================================================

/// `perf_event_open(2)` flag: set `O_CLOEXEC` on the returned descriptor
pub const PERF_FLAG_FD_CLOEXEC: u64 = 1 << 3;

/// `_IO('$', 0)`: enable the event
pub const PERF_EVENT_IOC_ENABLE: u64 = 0x2400;

/// `_IO('$', 1)`: disable the event
pub const PERF_EVENT_IOC_DISABLE: u64 = 0x2401;

/// Size of [`PerfEventAttr`] as understood by Linux 6.3+ (`PERF_ATTR_SIZE_VER8`)
///
/// Older kernels accept a larger `size` as long as the unknown tail is zeroed.
pub const PERF_ATTR_SIZE_VER8: u32 = 136;

// ============================================================================
// perf_event_attr Bitfield Masks
// ============================================================================

/// Counter starts disabled and must be enabled with `PERF_EVENT_IOC_ENABLE`
pub const ATTR_FLAG_DISABLED: u64 = 1 << 0;

/// Don't count (or trace) while the CPU is in kernel mode
pub const ATTR_FLAG_EXCLUDE_KERNEL: u64 = 1 << 5;

/// Don't count (or trace) while the CPU is in hypervisor mode
pub const ATTR_FLAG_EXCLUDE_HV: u64 = 1 << 6;

/// Bit offset of the two-bit `precise_ip` field
pub const ATTR_PRECISE_IP_SHIFT: u32 = 15;

/// Mask of the two-bit `precise_ip` field
pub const ATTR_PRECISE_IP_MASK: u64 = 0b11 << ATTR_PRECISE_IP_SHIFT;

/// `precise_ip = 3`: request zero skid
pub const PRECISE_IP_ZERO_SKID: u64 = 3;

// ============================================================================
// Shared Data Structures
// ============================================================================

/// Event descriptor passed to `perf_event_open(2)`
///
/// Unions in the C definition are flattened to the member this crate uses;
/// their storage size is identical.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct PerfEventAttr {
    /// PMU type (for Intel PT, read from sysfs)
    pub type_: u32,
    /// Size of this structure, for ABI versioning
    pub size: u32,
    pub config: u64,
    /// Union of `sample_period` / `sample_freq`
    pub sample_period: u64,
    pub sample_type: u64,
    pub read_format: u64,
    /// Packed bitfield (`disabled`, `exclude_kernel`, `precise_ip`, ...)
    pub flags: u64,
    /// Union of `wakeup_events` / `wakeup_watermark`
    pub wakeup_events: u32,
    pub bp_type: u32,
    /// Union of `bp_addr` / `config1`
    pub config1: u64,
    /// Union of `bp_len` / `config2`
    pub config2: u64,
    pub branch_sample_type: u64,
    pub sample_regs_user: u64,
    pub sample_stack_user: u32,
    pub clockid: i32,
    pub sample_regs_intr: u64,
    pub aux_watermark: u32,
    pub sample_max_stack: u16,
    pub reserved_2: u16,
    pub aux_sample_size: u32,
    pub reserved_3: u32,
    pub sig_data: u64,
    pub config3: u64,
}

impl PerfEventAttr {
    /// Set the two-bit `precise_ip` field
    pub fn set_precise_ip(&mut self, level: u64) {
        self.flags = (self.flags & !ATTR_PRECISE_IP_MASK)
            | ((level << ATTR_PRECISE_IP_SHIFT) & ATTR_PRECISE_IP_MASK);
    }

    /// Read back the two-bit `precise_ip` field
    #[must_use]
    pub fn precise_ip(&self) -> u64 {
        (self.flags & ATTR_PRECISE_IP_MASK) >> ATTR_PRECISE_IP_SHIFT
    }
}

/// Control page mapped at offset 0 of a perf event descriptor
///
/// The kernel updates `data_head` and `aux_head` asynchronously; userspace
/// owns `data_tail` and `aux_tail`, and writes `aux_offset`/`aux_size` before
/// mapping the AUX area. Always access these fields with volatile reads and
/// writes.
#[repr(C)]
pub struct PerfEventMmapPage {
    pub version: u32,
    pub compat_version: u32,
    pub lock: u32,
    pub index: u32,
    pub offset: i64,
    pub time_enabled: u64,
    pub time_running: u64,
    pub capabilities: u64,
    pub pmc_width: u16,
    pub time_shift: u16,
    pub time_mult: u32,
    pub time_offset: u64,
    pub time_zero: u64,
    pub size: u32,
    pub reserved_1: u32,
    pub time_cycles: u64,
    pub time_mask: u64,
    pub reserved: [u8; 116 * 8],

    // ========================================================================
    // Data ring buffer cursors (offset 1024)
    // ========================================================================
    pub data_head: u64,
    pub data_tail: u64,
    pub data_offset: u64,
    pub data_size: u64,

    // ========================================================================
    // AUX area cursors
    // ========================================================================
    /// Monotonic producer position (written by the kernel)
    pub aux_head: u64,
    /// Consumer position (written by userspace)
    pub aux_tail: u64,
    pub aux_offset: u64,
    pub aux_size: u64,
}

/// Byte offset of `data_head` inside [`PerfEventMmapPage`]
pub const MMAP_PAGE_DATA_HEAD_OFFSET: usize = 1024;

const _: () = assert!(core::mem::size_of::<PerfEventAttr>() == PERF_ATTR_SIZE_VER8 as usize);
const _: () =
    assert!(core::mem::offset_of!(PerfEventMmapPage, data_head) == MMAP_PAGE_DATA_HEAD_OFFSET);
const _: () = assert!(core::mem::offset_of!(PerfEventMmapPage, aux_size) == 1024 + 7 * 8);
