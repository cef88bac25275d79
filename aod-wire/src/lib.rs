//! Wire format shared between the kernel-side SMB/CIFS probes and the AOD
//! userspace daemon.
//!
//! The probes and the daemon agree on nothing but a byte layout: this crate
//! is the single source of truth for that layout, plus the shared-memory
//! ring sizing constants both sides must compute identically. Keeping this
//! in its own crate means a change to the record shape is a single-crate
//! recompile away from being caught at both ends.

#![allow(dead_code)]

use bytemuck::{Pod, Zeroable};

/// Page size assumed for ring sizing. The ring is sized in whole pages so
/// that a `mmap` backed by `/bpf_shm` never straddles a partial page.
pub const PAGE_SIZE: usize = 4096;

/// Number of page-sized slots the data region is carved from.
pub const RING_PAGES: usize = 2048;

/// Total size, in bytes, of the `/bpf_shm` shared-memory segment: the data
/// region plus the 16-byte cursor header (two `u64` cursors).
///
/// `(RING_PAGES + 1) * PAGE_SIZE` = 8,392,704 bytes.
pub const SHM_SIZE: usize = (RING_PAGES + 1) * PAGE_SIZE;

/// Size of the data region consumers actually read events from.
///
/// This is `SHM_SIZE - 16`, not `SHM_SIZE / 1000`: the header is a fixed
/// 16-byte pair of cursors, not a percentage of the segment. A producer
/// that computed this as a division would undersize the ring by three
/// orders of magnitude and nothing downstream would ever wrap correctly.
pub const SHM_DATA_SIZE: usize = SHM_SIZE - 16;

/// POSIX shared-memory object name the probes and the daemon both open.
pub const SHM_NAME: &str = "/bpf_shm";

/// Size in bytes of the two `u64` ring cursors (`head`, `tail`) that precede
/// the data region inside the shared-memory segment.
pub const CURSOR_HEADER_SIZE: usize = 16;

/// Fixed-size, C-ABI-compatible record written by the kernel probes and
/// read by the parser. Field order and padding here must match the
/// producer side exactly; nothing about this layout is negotiated at
/// runtime.
///
/// `metric` is a union in spirit: for latency-kind events it holds a
/// latency in nanoseconds, for error-kind events it holds a signed 32-bit
/// return code. [`Event::latency_ns`] and [`Event::retval`] are the two
/// ways to read it back out; which one applies is determined by the
/// anomaly kind consuming the event, not by anything in the record itself.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct Event {
    pub pid: i32,
    _pad_pid: [u8; 4],
    pub end_time_ns: u64,
    pub session_id: u64,
    pub mid: u64,
    pub smbcommand: u16,
    _pad_cmd: [u8; 6],
    pub metric: u64,
    pub tool: u8,
    pub is_compounded: u8,
    pub task: [u8; 16],
    _pad_tail: [u8; 6],
}

/// Size in bytes of one [`Event`] record on the wire.
pub const EVENT_RECORD_SIZE: usize = std::mem::size_of::<Event>();

const _: () = assert!(EVENT_RECORD_SIZE == 72);

impl Event {
    /// Build a record with the given identifying fields set and everything
    /// else zeroed. Mainly useful for tests and for code constructing
    /// synthetic events.
    pub fn new(pid: i32, end_time_ns: u64, session_id: u64, mid: u64, smbcommand: u16) -> Self {
        Self {
            pid,
            end_time_ns,
            session_id,
            mid,
            smbcommand,
            ..Zeroable::zeroed()
        }
    }

    /// Interpret `metric` as a latency in nanoseconds.
    pub fn latency_ns(&self) -> u64 {
        self.metric
    }

    pub fn set_latency_ns(&mut self, ns: u64) {
        self.metric = ns;
    }

    /// Interpret `metric` as a signed 32-bit return/status code. Only the
    /// low 32 bits are meaningful. Kernel producers are not assumed to
    /// sign-extend correctly, so we truncate rather than trust the upper
    /// bits.
    pub fn retval(&self) -> i32 {
        (self.metric & 0xFFFF_FFFF) as u32 as i32
    }

    pub fn set_retval(&mut self, retval: i32) {
        self.metric = (self.metric & !0xFFFF_FFFF) | (retval as u32 as u64);
    }

    /// The `task` field trimmed at its first NUL, or `"<invalid>"` if it
    /// isn't valid UTF-8. Kernel-supplied strings are not trusted to be
    /// well-formed.
    pub fn task_name(&self) -> &str {
        let len = self.task.iter().position(|&b| b == 0).unwrap_or(self.task.len());
        std::str::from_utf8(&self.task[..len]).unwrap_or("<invalid>")
    }
}
