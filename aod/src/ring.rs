//! The shared-memory SPSC ring: `attach`, `drain`, `rewind_tail`.
//!
//! `head` and `tail` are the two leading `u64` words of the mapped
//! segment, reinterpreted as atomics in place, the same trick the
//! reference daemon's sequencer consumer uses for its ticket ring, just
//! applied to a plain two-cursor byte region instead of a slot array.
//! `head` is producer-owned, `tail` consumer-owned; we only ever load
//! `head` and load/store `tail`.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicU64, Ordering};

use aod_wire::{EVENT_RECORD_SIZE, SHM_DATA_SIZE, SHM_SIZE};
use memmap2::MmapMut;

use crate::error::AodError;

/// MADV_HUGEPAGE (14 on Linux). Best-effort hint; failure is logged and
/// ignored, never fatal.
const MADV_HUGEPAGE: libc::c_int = 14;

pub struct Ring {
    mmap: MmapMut,
}

// SAFETY: the mapping is process-local; all cross-thread access goes
// through the atomic cursor words, and the data region is only read by
// the parser thread after observing a `head` value via acquire load.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

#[derive(Debug)]
pub struct RingCorruption(pub String);

impl std::fmt::Display for RingCorruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Ring {
    /// Open or create `name` as a POSIX shared-memory object of exactly
    /// `SHM_SIZE` bytes. When created, zeros both cursors; an existing
    /// segment's cursors are left untouched.
    pub fn attach(name: &str, create: bool) -> Result<Self, AodError> {
        let cname = std::ffi::CString::new(name).expect("shm name must not contain NUL");
        let flags = if create {
            libc::O_CREAT | libc::O_RDWR
        } else {
            libc::O_RDWR
        };

        let fd = unsafe { libc::shm_open(cname.as_ptr(), flags, 0o666) };
        if fd < 0 {
            return Err(AodError::RingMap(std::io::Error::last_os_error()));
        }
        // SAFETY: `shm_open` returned a valid, freshly-opened fd above.
        let owned_fd = unsafe { OwnedFd::from_raw_fd(fd) };

        if create {
            let ret = unsafe { libc::ftruncate(owned_fd.as_raw_fd(), SHM_SIZE as libc::off_t) };
            if ret != 0 {
                return Err(AodError::RingMap(std::io::Error::last_os_error()));
            }
        }

        let mmap = unsafe { memmap2::MmapOptions::new().len(SHM_SIZE).map_mut(&owned_fd) }
            .map_err(AodError::RingMap)?;
        let ring = Ring { mmap };
        ring.advise_hugepages();

        if create {
            ring.head_atomic().store(0, Ordering::Release);
            ring.tail_atomic().store(0, Ordering::Release);
        }

        Ok(ring)
    }

    /// An anonymous, non-shared mapping for tests: same layout, no
    /// `/dev/shm` name, no root required.
    #[cfg(test)]
    pub fn attach_anonymous() -> Self {
        let mmap = MmapMut::map_anon(SHM_SIZE).expect("anonymous mmap for test ring");
        let ring = Ring { mmap };
        ring.head_atomic().store(0, Ordering::Release);
        ring.tail_atomic().store(0, Ordering::Release);
        ring
    }

    fn advise_hugepages(&self) {
        let ret = unsafe {
            libc::madvise(self.mmap.as_ptr() as *mut libc::c_void, SHM_SIZE, MADV_HUGEPAGE)
        };
        if ret != 0 {
            log::debug!(
                "MADV_HUGEPAGE failed for ring buffer: {}",
                std::io::Error::last_os_error()
            );
        }
    }

    fn head_atomic(&self) -> &AtomicU64 {
        unsafe { &*(self.mmap.as_ptr() as *const AtomicU64) }
    }

    fn tail_atomic(&self) -> &AtomicU64 {
        unsafe { &*(self.mmap.as_ptr().add(8) as *const AtomicU64) }
    }

    fn data(&self) -> &[u8] {
        &self.mmap[16..]
    }

    /// Read whatever is available between `tail` and `head`, up to
    /// `max_len` bytes, and advance `tail` past what was copied. Never
    /// blocks; an empty ring returns an empty vector.
    ///
    /// Returns `Err` if the cursors are in an impossible state
    /// (`head` or `tail` at or beyond `SHM_DATA_SIZE`), indicating producer
    /// corruption. `tail` is left untouched in that case.
    pub fn drain(&self, max_len: usize) -> Result<Vec<u8>, RingCorruption> {
        let data_size = SHM_DATA_SIZE as u64;
        let head = self.head_atomic().load(Ordering::Acquire);
        let tail = self.tail_atomic().load(Ordering::Acquire);

        if head >= data_size || tail >= data_size {
            return Err(RingCorruption(format!(
                "impossible cursor state: head={head} tail={tail} data_size={data_size}"
            )));
        }

        let occupancy = (head + data_size - tail) % data_size;
        let n = occupancy.min(max_len as u64) as usize;
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; n];
        let start = tail as usize;
        if start + n <= SHM_DATA_SIZE {
            buf.copy_from_slice(&self.data()[start..start + n]);
        } else {
            let first = SHM_DATA_SIZE - start;
            buf[..first].copy_from_slice(&self.data()[start..]);
            buf[first..].copy_from_slice(&self.data()[..n - first]);
        }

        let new_tail = (tail + n as u64) % data_size;
        self.tail_atomic().store(new_tail, Ordering::Release);
        Ok(buf)
    }

    /// Move `tail` backward by `n` bytes, used by the parser to leave a
    /// trailing partial record unconsumed after `drain` advanced past it.
    pub fn rewind_tail(&self, n: usize) {
        if n == 0 {
            return;
        }
        let data_size = SHM_DATA_SIZE as u64;
        let tail = self.tail_atomic().load(Ordering::Acquire);
        let n = n as u64 % data_size;
        let new_tail = (tail + data_size - n) % data_size;
        self.tail_atomic().store(new_tail, Ordering::Release);
    }

    #[cfg(test)]
    pub fn occupancy(&self) -> u64 {
        let data_size = SHM_DATA_SIZE as u64;
        let head = self.head_atomic().load(Ordering::Acquire);
        let tail = self.tail_atomic().load(Ordering::Acquire);
        (head + data_size - tail) % data_size
    }

    /// Test-only producer simulation: append `bytes` at `head` and
    /// advance it, wrapping as needed. Mirrors the real producer's
    /// split-write behavior at the ring seam.
    #[cfg(test)]
    pub fn test_write(&mut self, bytes: &[u8]) {
        let data_size = SHM_DATA_SIZE;
        let head = self.head_atomic().load(Ordering::Acquire) as usize;
        let n = bytes.len();
        assert!(n <= data_size, "test_write exceeds ring capacity");

        let data_start = 16;
        if head + n <= data_size {
            self.mmap[data_start + head..data_start + head + n].copy_from_slice(bytes);
        } else {
            let first = data_size - head;
            self.mmap[data_start + head..data_start + data_size].copy_from_slice(&bytes[..first]);
            self.mmap[data_start..data_start + (n - first)].copy_from_slice(&bytes[first..]);
        }

        let new_head = (head + n) % data_size;
        self.head_atomic().store(new_head as u64, Ordering::Release);
    }

    #[cfg(test)]
    pub fn test_set_cursors(&self, head: u64, tail: u64) {
        self.head_atomic().store(head, Ordering::Release);
        self.tail_atomic().store(tail, Ordering::Release);
    }
}

/// Number of whole records currently representable by the ring's data
/// region; exposed for sizing scratch buffers in the parser loop.
pub const MAX_RECORDS_PER_DRAIN: usize = SHM_DATA_SIZE / EVENT_RECORD_SIZE;

#[cfg(test)]
mod tests {
    use super::*;
    use aod_wire::Event;

    fn record_bytes(pid: i32, smbcommand: u16, latency_ns: u64) -> Vec<u8> {
        let mut e = Event::new(pid, 0, 0, 0, smbcommand);
        e.set_latency_ns(latency_ns);
        bytemuck::bytes_of(&e).to_vec()
    }

    #[test]
    fn drain_on_empty_ring_returns_empty_and_leaves_tail() {
        let ring = Ring::attach_anonymous();
        let before = ring.occupancy();
        let drained = ring.drain(4096).unwrap();
        assert!(drained.is_empty());
        assert_eq!(ring.occupancy(), before);
    }

    #[test]
    fn round_trip_n_records() {
        let mut ring = Ring::attach_anonymous();
        let records: Vec<Vec<u8>> = (0..5).map(|i| record_bytes(100 + i, 9, 1000 * i as u64)).collect();
        for r in &records {
            ring.test_write(r);
        }

        let drained = ring.drain(aod_wire::SHM_DATA_SIZE).unwrap();
        assert_eq!(drained.len(), records.len() * aod_wire::EVENT_RECORD_SIZE);
        for (i, chunk) in drained.chunks_exact(aod_wire::EVENT_RECORD_SIZE).enumerate() {
            assert_eq!(chunk, records[i].as_slice());
        }
    }

    #[test]
    fn wrap_around_round_trip() {
        let mut ring = Ring::attach_anonymous();
        let record = record_bytes(4242, 3, 555);
        let record_size = record.len();

        // Put head right before the seam so this record straddles it.
        let head = (aod_wire::SHM_DATA_SIZE - record_size / 2) as u64;
        ring.test_set_cursors(head, head);
        ring.test_write(&record);

        assert_eq!(ring.occupancy() as usize, record_size);
        let drained = ring.drain(4096).unwrap();
        assert_eq!(drained, record);
    }

    #[test]
    fn corruption_is_detected_when_cursor_exceeds_data_size() {
        let ring = Ring::attach_anonymous();
        ring.test_set_cursors(aod_wire::SHM_DATA_SIZE as u64 + 10, 0);
        let result = ring.drain(4096);
        assert!(result.is_err());
    }

    #[test]
    fn rewind_tail_restores_unconsumed_bytes() {
        let mut ring = Ring::attach_anonymous();
        let record = record_bytes(1, 1, 1);
        ring.test_write(&record);
        ring.test_write(&record);

        // Drain one-and-a-half records worth of bytes.
        let partial_len = record.len() + record.len() / 2;
        let drained = ring.drain(partial_len).unwrap();
        assert_eq!(drained.len(), partial_len);

        let leftover = partial_len - record.len();
        ring.rewind_tail(leftover);

        // What remains in the ring should be exactly the second record.
        let remaining = ring.drain(4096).unwrap();
        assert_eq!(remaining, record);
    }
}
