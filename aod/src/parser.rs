//! Turns bytes drained from the ring into a typed [`EventBatch`].
//!
//! Reinterpretation happens only at record boundaries: `bytemuck` gives
//! us a validated, checked-size view rather than an untyped pointer cast,
//! which is exactly the re-architecture the untyped-binary-casting design
//! note calls for.

use aod_wire::{Event, EVENT_RECORD_SIZE};

#[derive(Debug, Default, Clone)]
pub struct EventBatch {
    pub events: Vec<Event>,
}

impl EventBatch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

/// Parse `bytes` into whole [`Event`] records. Returns the batch plus the
/// number of trailing bytes that didn't form a whole record. The caller
/// (the parser loop, which owns the [`crate::ring::Ring`]) is responsible
/// for calling `ring.rewind_tail(leftover)` when `leftover > 0`.
pub fn parse(bytes: &[u8]) -> (EventBatch, usize) {
    let whole_records = bytes.len() / EVENT_RECORD_SIZE;
    let used = whole_records * EVENT_RECORD_SIZE;
    let leftover = bytes.len() - used;

    let mut events = Vec::with_capacity(whole_records);
    for chunk in bytes[..used].chunks_exact(EVENT_RECORD_SIZE) {
        events.push(bytemuck::pod_read_unaligned(chunk));
    }

    (EventBatch { events }, leftover)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_bytes(smbcommand: u16, latency_ns: u64) -> Vec<u8> {
        let mut e = Event::new(1, 0, 0, 0, smbcommand);
        e.set_latency_ns(latency_ns);
        bytemuck::bytes_of(&e).to_vec()
    }

    #[test]
    fn empty_bytes_is_an_empty_batch() {
        let (batch, leftover) = parse(&[]);
        assert!(batch.is_empty());
        assert_eq!(leftover, 0);
    }

    #[test]
    fn whole_records_parse_cleanly() {
        let mut bytes = Vec::new();
        bytes.extend(record_bytes(9, 100));
        bytes.extend(record_bytes(10, 200));

        let (batch, leftover) = parse(&bytes);
        assert_eq!(leftover, 0);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.events[0].smbcommand, 9);
        assert_eq!(batch.events[1].latency_ns(), 200);
    }

    #[test]
    fn trailing_partial_record_is_reported_not_dropped() {
        let mut bytes = record_bytes(9, 100);
        bytes.extend_from_slice(&[0xAB; 10]);

        let (batch, leftover) = parse(&bytes);
        assert_eq!(batch.len(), 1);
        assert_eq!(leftover, 10);
    }
}
