//! Individual frame slots and their atomic state machine.

use atomic_waker::AtomicWaker;
use core::{
    ptr::{NonNull, addr_of, addr_of_mut},
    sync::atomic::{AtomicU8, AtomicU16, AtomicU32, Ordering},
    task::Waker,
};

use crate::{datagram::FramePriority, error::PduError, ethernet::EthernetFrame, fmt};

/// The most datagrams a single frame can carry.
///
/// Bounded so each frame slot can record the indices it holds; the payload
/// area of a standard MTU frame runs out shortly after this in practice.
pub(crate) const MAX_DATAGRAMS: usize = 32;

/// Marker for a frame slot with no datagrams pushed yet.
const FIRST_INDEX_EMPTY: u16 = 0xffff;

/// Frame state.
///
/// A frame's journey:
///
/// ```text
/// None -> Created:       claimed by alloc_frame(), exclusively owned by calling code
/// Created -> Sendable:   datagrams pushed, mark_sendable() called, TX waker woken
/// Sendable -> Sending:   claimed by the TX loop
/// Sending -> Sent:       handed to the network interface
/// Sent -> RxBusy:        response arrived, claimed by the RX path
/// RxBusy -> RxDone:      response validated and stored, frame waker woken
/// RxDone -> RxProcessing: response data handed to the awaiting future
/// RxProcessing -> None:  response data dropped, slot free again
/// ```
///
/// A `Sending -> RxBusy` shortcut exists because a response can return
/// before the sending task has marked the frame `Sent`.
#[atomic_enum::atomic_enum]
#[derive(PartialEq, Default)]
pub(crate) enum FrameState {
    // SAFETY: `FrameElement`s are created inside `MaybeUninit::zeroed`, so
    // the empty state MUST be zero.
    #[default]
    None = 0,
    Created = 1,
    Sendable = 2,
    Sending = 3,
    Sent = 4,
    RxBusy = 5,
    RxDone = 6,
    RxProcessing = 7,
}

/// Allocator for the 256 available datagram indices.
///
/// An index is in exactly one of two states: free, or attached to an
/// in-flight frame slot. [`alloc`](IndexAllocator::alloc) moves it to
/// in-flight, [`free`](IndexAllocator::free) back again when the response
/// arrived, timed out or was abandoned.
#[derive(Debug)]
pub(crate) struct IndexAllocator {
    bits: [AtomicU32; 8],
    /// Rotates so recycled indices are not immediately reused, which helps
    /// catch stale responses.
    hint: AtomicU8,
}

impl IndexAllocator {
    pub const fn new() -> Self {
        Self {
            bits: [
                AtomicU32::new(0),
                AtomicU32::new(0),
                AtomicU32::new(0),
                AtomicU32::new(0),
                AtomicU32::new(0),
                AtomicU32::new(0),
                AtomicU32::new(0),
                AtomicU32::new(0),
            ],
            hint: AtomicU8::new(0),
        }
    }

    /// Take a free index out of the pool.
    pub fn alloc(&self) -> Result<u8, PduError> {
        for _ in 0..=u8::MAX {
            let index = self.hint.fetch_add(1, Ordering::Relaxed);

            let word = usize::from(index / 32);
            let mask = 1u32 << (index % 32);

            let prev = self.bits[word].fetch_or(mask, Ordering::AcqRel);

            if prev & mask == 0 {
                return Ok(index);
            }
        }

        Err(PduError::OutOfIndices)
    }

    /// Return an index to the pool.
    pub fn free(&self, index: u8) {
        let word = usize::from(index / 32);
        let mask = 1u32 << (index % 32);

        let prev = self.bits[word].fetch_and(!mask, Ordering::AcqRel);

        debug_assert!(prev & mask != 0, "freed index {} was not in flight", index);
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> usize {
        self.bits
            .iter()
            .map(|word| word.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }
}

/// An individual frame slot: state, bookkeeping and the raw Ethernet frame
/// buffer.
#[derive(Debug)]
#[repr(C)]
pub(crate) struct FrameElement<const N: usize> {
    status: AtomicFrameState,
    waker: AtomicWaker,

    /// TX queue class; high priority frames are sent before low priority
    /// ones.
    priority: FramePriority,

    /// When set, the RX path releases the frame on response instead of
    /// waking a waiter.
    detached: bool,

    /// Number of datagrams pushed into this frame.
    datagram_count: u8,

    /// The datagram indices held by this frame, `[0..datagram_count]` valid.
    indices: [u8; MAX_DATAGRAMS],

    /// How much of the datagram payload area is in use.
    payload_len: usize,

    /// Index of the first datagram in this frame, used by the RX path to
    /// find the slot a received frame belongs to. Upper byte is
    /// [`FIRST_INDEX_EMPTY`] when nothing has been pushed.
    first_index: AtomicU16,

    // MUST be the last field so `NonNull<FrameElement<0>>` pointer
    // arithmetic stays valid.
    buffer: [u8; N],
}

impl<const N: usize> Default for FrameElement<N> {
    fn default() -> Self {
        Self {
            status: AtomicFrameState::new(FrameState::None),
            waker: AtomicWaker::new(),
            priority: FramePriority::Low,
            detached: false,
            datagram_count: 0,
            indices: [0; MAX_DATAGRAMS],
            payload_len: 0,
            first_index: AtomicU16::new(FIRST_INDEX_EMPTY),
            buffer: [0; N],
        }
    }
}

impl<const N: usize> FrameElement<N> {
    unsafe fn status<'a>(this: NonNull<FrameElement<N>>) -> &'a AtomicFrameState {
        unsafe { &*addr_of!((*this.as_ptr()).status) }
    }

    /// Atomically swap the frame state from `from` to `to`, failing with the
    /// actual state on mismatch.
    unsafe fn swap_state(
        this: NonNull<FrameElement<N>>,
        from: FrameState,
        to: FrameState,
    ) -> Result<(), FrameState> {
        unsafe { Self::status(this) }
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Relaxed)
            .map(|_| ())
    }

    /// Claim a free frame slot for population.
    pub unsafe fn claim_created(this: NonNull<FrameElement<N>>) -> Result<(), FrameState> {
        unsafe { Self::swap_state(this, FrameState::None, FrameState::Created) }
    }

    /// Claim a sendable frame for putting on the wire.
    pub unsafe fn claim_sending(this: NonNull<FrameElement<N>>) -> bool {
        unsafe { Self::swap_state(this, FrameState::Sendable, FrameState::Sending) }.is_ok()
    }

    /// Claim a sent (or still sending) frame for response processing.
    pub unsafe fn claim_receiving(this: NonNull<FrameElement<N>>) -> bool {
        unsafe {
            Self::swap_state(this, FrameState::Sent, FrameState::RxBusy)
                .or_else(|_| Self::swap_state(this, FrameState::Sending, FrameState::RxBusy))
                .is_ok()
        }
    }

    pub unsafe fn first_index(this: NonNull<FrameElement<N>>) -> u16 {
        unsafe { &*addr_of!((*this.as_ptr()).first_index) }.load(Ordering::Acquire)
    }
}

/// Size in memory of one `FrameElement<N>`, i.e. the stride between
/// consecutive elements in a storage array.
///
/// The buffer field is last and every `FrameElement<N>` shares the same
/// prefix layout, so the element size is the buffer offset plus the buffer
/// length, rounded up to the struct alignment.
pub(crate) fn frame_element_stride(buffer_len: usize) -> usize {
    let buffer_offset = core::mem::offset_of!(FrameElement<0>, buffer);
    let align = core::mem::align_of::<FrameElement<0>>();

    (buffer_offset + buffer_len).next_multiple_of(align)
}

/// A typed handle over a claimed [`FrameElement`].
///
/// The element's non-atomic fields may only be touched through a `FrameBox`
/// while the matching state claim is held.
pub(crate) struct FrameBox<'sto> {
    frame: NonNull<FrameElement<0>>,
    index_alloc: &'sto IndexAllocator,
    tx_waker: &'sto AtomicWaker,
    /// Full element buffer length, i.e. the `N` of the underlying
    /// `FrameElement<N>`.
    buffer_len: usize,
}

// SAFETY: Exclusive element access is enforced by the atomic frame state.
unsafe impl Send for FrameBox<'_> {}

impl core::fmt::Debug for FrameBox<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrameBox")
            .field("first_index", &self.first_index())
            .field("payload_len", &self.payload_len())
            .finish()
    }
}

impl<'sto> FrameBox<'sto> {
    pub fn new(
        frame: NonNull<FrameElement<0>>,
        index_alloc: &'sto IndexAllocator,
        tx_waker: &'sto AtomicWaker,
        buffer_len: usize,
    ) -> Self {
        Self {
            frame,
            index_alloc,
            tx_waker,
            buffer_len,
        }
    }

    pub fn index_alloc(&self) -> &'sto IndexAllocator {
        self.index_alloc
    }

    /// Tell the TX task there is a frame ready to send.
    pub fn wake_sender(&self) {
        self.tx_waker.wake();
    }

    /// Reset bookkeeping after a `None -> Created` claim.
    pub fn init(&mut self, priority: FramePriority) {
        unsafe {
            let this = self.frame.as_ptr();

            addr_of_mut!((*this).priority).write(priority);
            addr_of_mut!((*this).detached).write(false);
            addr_of_mut!((*this).datagram_count).write(0);
            addr_of_mut!((*this).payload_len).write(0);
            (*addr_of_mut!((*this).first_index)).store(FIRST_INDEX_EMPTY, Ordering::Release);
            (*addr_of_mut!((*this).waker)).take();
        }

        self.buffer_mut().fill(0);
    }

    fn state(&self) -> &AtomicFrameState {
        unsafe { &*addr_of!((*self.frame.as_ptr()).status) }
    }

    pub fn set_state(&self, state: FrameState) {
        self.state().store(state, Ordering::Release);
    }

    pub fn swap_state(&self, from: FrameState, to: FrameState) -> Result<(), FrameState> {
        self.state()
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Relaxed)
            .map(|_| ())
    }

    pub fn priority(&self) -> FramePriority {
        unsafe { *addr_of!((*self.frame.as_ptr()).priority) }
    }

    pub fn set_detached(&mut self) {
        unsafe { addr_of_mut!((*self.frame.as_ptr()).detached).write(true) }
    }

    pub fn is_detached(&self) -> bool {
        unsafe { *addr_of!((*self.frame.as_ptr()).detached) }
    }

    pub fn datagram_count(&self) -> u8 {
        unsafe { *addr_of!((*self.frame.as_ptr()).datagram_count) }
    }

    pub fn first_index(&self) -> Option<u8> {
        let raw = unsafe { &*addr_of!((*self.frame.as_ptr()).first_index) }.load(Ordering::Acquire);

        (raw != FIRST_INDEX_EMPTY).then_some(raw as u8)
    }

    /// Record a freshly allocated datagram index against this frame.
    pub fn push_index(&mut self, index: u8) -> Result<(), PduError> {
        unsafe {
            let this = self.frame.as_ptr();

            let count = usize::from(*addr_of!((*this).datagram_count));

            if count >= MAX_DATAGRAMS {
                return Err(PduError::TooLong);
            }

            (*addr_of_mut!((*this).indices))[count] = index;
            addr_of_mut!((*this).datagram_count).write(count as u8 + 1);

            if count == 0 {
                (*addr_of_mut!((*this).first_index)).store(u16::from(index), Ordering::Release);
            }
        }

        Ok(())
    }

    pub fn payload_len(&self) -> usize {
        unsafe { *addr_of!((*self.frame.as_ptr()).payload_len) }
    }

    pub fn set_payload_len(&mut self, len: usize) {
        unsafe { addr_of_mut!((*self.frame.as_ptr()).payload_len).write(len) }
    }

    /// The whole element buffer: Ethernet header, EtherCAT header, datagrams.
    fn buffer_mut(&mut self) -> &mut [u8] {
        unsafe {
            let buf_ptr = addr_of_mut!((*self.frame.as_ptr()).buffer).cast::<u8>();

            core::slice::from_raw_parts_mut(buf_ptr, self.buffer_len)
        }
    }

    fn buffer(&self) -> &[u8] {
        unsafe {
            let buf_ptr = addr_of!((*self.frame.as_ptr()).buffer).cast::<u8>();

            core::slice::from_raw_parts(buf_ptr, self.buffer_len)
        }
    }

    /// The 2 byte EtherCAT frame header region.
    pub fn ecat_header_mut(&mut self) -> &mut [u8] {
        let range = EthernetFrame::<&[u8]>::header_len()..EthernetFrame::<&[u8]>::header_len() + 2;

        &mut self.buffer_mut()[range]
    }

    /// The datagram payload area after both headers.
    pub fn datagram_buf(&self) -> &[u8] {
        &self.buffer()[EthernetFrame::<&[u8]>::header_len() + 2..]
    }

    /// The datagram payload area after both headers.
    pub fn datagram_buf_mut(&mut self) -> &mut [u8] {
        let start = EthernetFrame::<&[u8]>::header_len() + 2;

        &mut self.buffer_mut()[start..]
    }

    /// The complete Ethernet frame as currently populated.
    pub fn ethernet_frame(&self) -> &[u8] {
        let len = EthernetFrame::<&[u8]>::header_len() + 2 + self.payload_len();

        &self.buffer()[0..len]
    }

    pub fn ethernet_frame_mut(&mut self) -> &mut [u8] {
        let len = EthernetFrame::<&[u8]>::header_len() + 2 + self.payload_len();

        &mut self.buffer_mut()[0..len]
    }

    pub fn register_waker(&self, waker: &Waker) {
        unsafe { &*addr_of!((*self.frame.as_ptr()).waker) }.register(waker);
    }

    pub fn wake(&self) {
        unsafe { &*addr_of!((*self.frame.as_ptr()).waker) }.wake();
    }

    /// Free all held datagram indices and return the slot to the free state.
    pub fn release(&mut self) {
        unsafe {
            let this = self.frame.as_ptr();

            let count = usize::from(*addr_of!((*this).datagram_count));

            for i in 0..count {
                self.index_alloc.free((*addr_of!((*this).indices))[i]);
            }

            addr_of_mut!((*this).datagram_count).write(0);
            (*addr_of_mut!((*this).first_index)).store(FIRST_INDEX_EMPTY, Ordering::Release);
        }

        self.set_state(FrameState::None);
    }

    /// Release a frame that may currently be owned by another context (the
    /// TX or RX path), e.g. when a response future is dropped early.
    ///
    /// Transient states are waited out with a bounded spin; an element stuck
    /// in a transient state is leaked rather than corrupted.
    pub fn release_from_any_state(&mut self) {
        for _ in 0..10_000 {
            let reclaimable = [
                FrameState::Created,
                FrameState::Sendable,
                FrameState::Sent,
                FrameState::RxDone,
                FrameState::RxProcessing,
            ];

            for state in reclaimable {
                if self.swap_state(state, FrameState::RxProcessing).is_ok() {
                    self.release();

                    return;
                }
            }

            if matches!(
                self.state().load(Ordering::Acquire),
                FrameState::None
            ) {
                return;
            }

            // Sending or RxBusy: another context holds the element right now
            core::hint::spin_loop();
        }

        fmt::error!("frame slot stuck in transient state, leaking");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_matches_rustc_layout() {
        assert_eq!(
            frame_element_stride(0),
            core::mem::size_of::<FrameElement<0>>()
        );
        assert_eq!(
            frame_element_stride(128),
            core::mem::size_of::<FrameElement<128>>()
        );
        assert_eq!(
            frame_element_stride(1116),
            core::mem::size_of::<FrameElement<1116>>()
        );
    }

    #[test]
    fn index_allocator_exhaustion() {
        let alloc = IndexAllocator::new();

        for i in 0..=255u16 {
            assert!(alloc.alloc().is_ok(), "alloc {} failed", i);
        }

        assert_eq!(alloc.in_flight(), 256);
        assert_eq!(alloc.alloc(), Err(PduError::OutOfIndices));

        alloc.free(17);

        assert_eq!(alloc.alloc(), Ok(17));
    }

    #[test]
    fn index_allocator_unique() {
        let alloc = IndexAllocator::new();

        let mut seen = [false; 256];

        for _ in 0..256 {
            let idx = alloc.alloc().unwrap();

            assert!(!seen[usize::from(idx)], "index {} handed out twice", idx);

            seen[usize::from(idx)] = true;
        }
    }

    #[test]
    fn recycled_index_not_immediately_reused() {
        let alloc = IndexAllocator::new();

        let first = alloc.alloc().unwrap();

        alloc.free(first);

        // The hint rotates, so the next allocation picks a different index
        // even though the freed one is available again.
        assert_ne!(alloc.alloc().unwrap(), first);
    }
}
