//! Backing storage for the datagram engine.

use atomic_waker::AtomicWaker;
use core::{
    cell::UnsafeCell,
    marker::PhantomData,
    mem::MaybeUninit,
    ptr::NonNull,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use crate::{
    datagram::{
        DatagramLoop, DatagramRx, DatagramTx, FramePriority,
        created_frame::CreatedFrame,
        frame_element::{FrameBox, FrameElement, IndexAllocator, frame_element_stride},
        received_frame::ReceivingFrame,
    },
    error::PduError,
    ethernet::EthernetFrame,
};

/// Fixed storage for all frame slots used by a [`Master`](crate::Master).
///
/// Declared `static` in the common case:
///
/// ```rust
/// use catline::DatagramStorage;
///
/// const MAX_FRAMES: usize = 16;
/// const FRAME_SIZE: usize = DatagramStorage::<0, 0>::element_size(1100);
///
/// static STORAGE: DatagramStorage<MAX_FRAMES, FRAME_SIZE> = DatagramStorage::new();
///
/// let (tx, rx, dgram_loop) = STORAGE.try_split().expect("can only split once");
/// ```
pub struct DatagramStorage<const MAX_FRAMES: usize = 0, const FRAME_SIZE: usize = 0> {
    frames: UnsafeCell<MaybeUninit<[FrameElement<FRAME_SIZE>; MAX_FRAMES]>>,
    index_alloc: IndexAllocator,
    tx_waker: AtomicWaker,
    frame_cursor: AtomicUsize,
    split: AtomicBool,
}

impl<const MAX_FRAMES: usize, const FRAME_SIZE: usize> core::fmt::Debug
    for DatagramStorage<MAX_FRAMES, FRAME_SIZE>
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DatagramStorage")
            .field("max_frames", &MAX_FRAMES)
            .field("frame_size", &FRAME_SIZE)
            .field("split", &self.split)
            .finish()
    }
}

unsafe impl<const MAX_FRAMES: usize, const FRAME_SIZE: usize> Sync
    for DatagramStorage<MAX_FRAMES, FRAME_SIZE>
{
}

impl<const MAX_FRAMES: usize, const FRAME_SIZE: usize> Default
    for DatagramStorage<MAX_FRAMES, FRAME_SIZE>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const MAX_FRAMES: usize, const FRAME_SIZE: usize> DatagramStorage<MAX_FRAMES, FRAME_SIZE> {
    /// Create a new datagram storage instance.
    pub const fn new() -> Self {
        // MSRV: when `const {}` assertions in where clauses stabilise, move
        // these there.
        assert!(
            MAX_FRAMES <= 256,
            "up to 256 frames are supported as the first datagram index identifies its frame"
        );
        assert!(
            FRAME_SIZE > Self::element_size(0),
            "frame size must leave room for Ethernet and EtherCAT headers"
        );

        // SAFETY: `FrameState::None` is zero, so a zeroed buffer is a valid
        // array of free frame elements.
        let frames = UnsafeCell::new(unsafe { MaybeUninit::zeroed().assume_init() });

        Self {
            frames,
            index_alloc: IndexAllocator::new(),
            tx_waker: AtomicWaker::new(),
            frame_cursor: AtomicUsize::new(0),
            split: AtomicBool::new(false),
        }
    }

    /// Compute the per-frame element size required to hold `payload` bytes
    /// of datagrams.
    ///
    /// Each datagram in a frame adds 12 bytes of header and working counter
    /// overhead to its payload.
    pub const fn element_size(payload: usize) -> usize {
        EthernetFrame::<&[u8]>::header_len() + 2 + payload
    }

    /// Split the storage into a TX handle, an RX handle and the
    /// [`DatagramLoop`] driving them.
    ///
    /// Fails if called more than once.
    pub fn try_split(&self) -> Result<(DatagramTx<'_>, DatagramRx<'_>, DatagramLoop<'_>), ()> {
        self.split
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .map_err(|_| ())?;

        let storage = self.as_ref();

        Ok((
            DatagramTx::new(storage),
            DatagramRx::new(storage),
            DatagramLoop::new(storage),
        ))
    }

    fn as_ref(&self) -> DatagramStorageRef<'_> {
        DatagramStorageRef {
            frames: unsafe { NonNull::new_unchecked(self.frames.get().cast()) },
            num_frames: MAX_FRAMES,
            frame_size: FRAME_SIZE,
            index_alloc: &self.index_alloc,
            tx_waker: &self.tx_waker,
            frame_cursor: &self.frame_cursor,
            _lifetime: PhantomData,
        }
    }
}

/// A borrowed view of a [`DatagramStorage`], shared by all engine handles.
#[derive(Debug, Copy, Clone)]
pub(crate) struct DatagramStorageRef<'sto> {
    frames: NonNull<FrameElement<0>>,
    pub num_frames: usize,
    pub frame_size: usize,
    pub index_alloc: &'sto IndexAllocator,
    pub tx_waker: &'sto AtomicWaker,
    frame_cursor: &'sto AtomicUsize,
    _lifetime: PhantomData<&'sto ()>,
}

// SAFETY: Exclusive frame element access is enforced by the per-element
// atomic state.
unsafe impl Send for DatagramStorageRef<'_> {}
unsafe impl Sync for DatagramStorageRef<'_> {}

impl<'sto> DatagramStorageRef<'sto> {
    pub fn frame_at(&self, index: usize) -> NonNull<FrameElement<0>> {
        debug_assert!(index < self.num_frames);

        unsafe {
            NonNull::new_unchecked(
                self.frames
                    .as_ptr()
                    .byte_add(index * frame_element_stride(self.frame_size)),
            )
        }
    }

    pub(crate) fn frame_box(&self, frame: NonNull<FrameElement<0>>) -> FrameBox<'sto> {
        FrameBox::new(frame, self.index_alloc, self.tx_waker, self.frame_size)
    }

    /// Claim a free frame slot, ready for datagrams to be pushed.
    pub fn alloc_frame(&self, priority: FramePriority) -> Result<CreatedFrame<'sto>, PduError> {
        for _ in 0..self.num_frames {
            let slot = self.frame_cursor.fetch_add(1, Ordering::Relaxed) % self.num_frames;

            let frame = self.frame_at(slot);

            if unsafe { FrameElement::claim_created(frame) }.is_ok() {
                let mut inner = self.frame_box(frame);

                inner.init(priority);

                return Ok(CreatedFrame::new(inner));
            }
        }

        Err(PduError::NoFrameSlots)
    }

    /// Find the in-flight frame whose first datagram carries `index` and
    /// claim it for response processing.
    pub fn claim_receiving(&self, index: u8) -> Option<ReceivingFrame<'sto>> {
        for slot in 0..self.num_frames {
            let frame = self.frame_at(slot);

            if unsafe { FrameElement::first_index(frame) } == u16::from(index)
                && unsafe { FrameElement::claim_receiving(frame) }
            {
                return Some(ReceivingFrame::new(self.frame_box(frame)));
            }
        }

        None
    }

    /// Claim the next frame waiting to be sent, preferring high priority
    /// frames.
    pub fn claim_sending(&self) -> Option<FrameBox<'sto>> {
        for priority in [FramePriority::High, FramePriority::Low] {
            for slot in 0..self.num_frames {
                let frame = self.frame_at(slot);

                let fb = self.frame_box(frame);

                // Priority is stable while the frame sits in Sendable, but
                // may only be acted on once the claim succeeds.
                if fb.priority() == priority && unsafe { FrameElement::claim_sending(frame) } {
                    return Some(fb);
                }
            }
        }

        None
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    #[test]
    fn no_spare_frames() {
        const NUM_FRAMES: usize = 16;
        const FRAME_SIZE: usize = DatagramStorage::<0, 0>::element_size(128);

        let storage: DatagramStorage<NUM_FRAMES, FRAME_SIZE> = DatagramStorage::new();
        let s = storage.as_ref();

        let mut held = heapless::Vec::<_, NUM_FRAMES>::new();

        for _ in 0..NUM_FRAMES {
            let mut frame = s.alloc_frame(FramePriority::Low).expect("alloc");

            frame
                .push_datagram(Command::lwr(0x1234).into(), [0xaau8; 4], None)
                .expect("push");

            held.push(frame).ok().expect("hold");
        }

        assert!(matches!(
            s.alloc_frame(FramePriority::Low),
            Err(PduError::NoFrameSlots)
        ));

        // Dropping a held frame frees its slot again
        let _ = held.pop();

        assert!(s.alloc_frame(FramePriority::Low).is_ok());
    }

    #[test]
    fn element_size_includes_headers() {
        assert_eq!(DatagramStorage::<0, 0>::element_size(0), 16);
        assert_eq!(DatagramStorage::<0, 0>::element_size(1100), 1116);
    }

    #[test]
    fn released_frame_returns_indices() {
        const FRAME_SIZE: usize = DatagramStorage::<0, 0>::element_size(128);

        let storage: DatagramStorage<4, FRAME_SIZE> = DatagramStorage::new();
        let s = storage.as_ref();

        {
            let mut frame = s.alloc_frame(FramePriority::Low).expect("alloc");

            frame
                .push_datagram(Command::brd(0x0000).into(), (), Some(1))
                .expect("push 1");
            frame
                .push_datagram(Command::brd(0x0130).into(), (), Some(2))
                .expect("push 2");

            assert_eq!(storage.index_alloc.in_flight(), 2);
        }

        // Frame dropped without sending: indices must be freed
        assert_eq!(storage.index_alloc.in_flight(), 0);
    }
}
