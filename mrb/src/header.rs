//! The buffer header: the one piece of the mapping every writer and reader agrees on.
//!
//! Layout is `#[repr(C)]` and fixed at creation time; a reader must never write to any field
//! other than `head`. `head` and `tail` are packed pointers (see [`crate::ptr`]) stored as plain
//! `u64`s so that a single atomic load/store moves both the sequence number and offset together.
//! Everything except `active`, `head`, and `tail` is written once, before `active` is set, and
//! never touched again; the release store to `active` is what publishes those plain fields to
//! every later opener's acquire load, the same "set fields then flip a flag" idiom the header
//! this module is modeled on uses.
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// On-disk/in-memory representation of the ring's control block.
///
/// Multi-byte fields are stored little-endian; native atomics are used for the load/store itself
/// and bytes are swapped at the boundary on big-endian hosts, so the in-memory representation is
/// whatever the host's registers want while two different architectures observe the same bytes
/// on disk.
#[repr(C)]
pub struct RawHeader {
    /// `0` until the writer has finished initializing every other field; readers must not trust
    /// anything else in the header (or the data region) until they observe this as `1`.
    active: AtomicU32,
    /// `log2` of the alignment every reserved item's offset is rounded up to.
    align_bits: u16,
    /// Number of low bits of a packed pointer that hold the (pre-shift) offset.
    off_bits: u16,
    /// Largest payload a single `reserve` may ask for, fixed at creation time.
    max_item_size: u64,
    /// Packed pointer to the first unreleased item; advisory only, never synchronizing.
    head: AtomicU64,
    /// Packed pointer to the next slot the writer will reserve into.
    tail: AtomicU64,
}

/// Size of [`RawHeader`] rounded up by callers to the host page size before mapping the data
/// region right after it.
pub const HEADER_SIZE: usize = std::mem::size_of::<RawHeader>();

impl RawHeader {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) != 0
    }

    pub fn activate(&self) {
        self.active.store(1, Ordering::Release);
    }

    pub fn deactivate(&self) {
        self.active.store(0, Ordering::Release);
    }

    /// Safe once `is_active` has returned `true` for this mapping, per the module-level
    /// publication contract.
    pub fn align_bits(&self) -> u16 {
        u16::from_le(self.align_bits)
    }

    pub fn off_bits(&self) -> u16 {
        u16::from_le(self.off_bits)
    }

    pub fn max_item_size(&self) -> u64 {
        u64::from_le(self.max_item_size)
    }

    pub fn head(&self, order: Ordering) -> u64 {
        u64::from_le(self.head.load(order))
    }

    pub fn store_head(&self, head: u64, order: Ordering) {
        self.head.store(head.to_le(), order);
    }

    pub fn tail(&self, order: Ordering) -> u64 {
        u64::from_le(self.tail.load(order))
    }

    pub fn store_tail(&self, tail: u64, order: Ordering) {
        self.tail.store(tail.to_le(), order);
    }

    /// Only ever called by the writer before the first `activate`, so a plain write is
    /// sufficient: no reader can observe this memory until the matching acquire load succeeds.
    /// Takes `&mut self` rather than relying on a pointer cast, since `align_bits`/`off_bits`/
    /// `max_item_size` carry no interior mutability of their own.
    pub(crate) fn init(&mut self, align_bits: u16, off_bits: u16, max_item_size: u64) {
        self.align_bits = align_bits.to_le();
        self.off_bits = off_bits.to_le();
        self.max_item_size = max_item_size.to_le();
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_plain_old_data() {
        // mrb_create ftruncates a fresh file and maps it, relying on the kernel's zero-fill
        // rather than an explicit memset; RawHeader must stay safely zero-initializable.
        let zeroed: RawHeader = unsafe { std::mem::zeroed() };
        assert!(!zeroed.is_active());
        assert_eq!(zeroed.head(Ordering::Relaxed), 0);
        assert_eq!(zeroed.tail(Ordering::Relaxed), 0);
    }

    #[test]
    fn init_then_activate_round_trips() {
        let mut header: RawHeader = unsafe { std::mem::zeroed() };
        header.init(5, 7, 4096);
        assert_eq!(header.align_bits(), 5);
        assert_eq!(header.off_bits(), 7);
        assert_eq!(header.max_item_size(), 4096);
        assert!(!header.is_active());
        header.activate();
        assert!(header.is_active());
    }
}
