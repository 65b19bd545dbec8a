//! Traits used to pack and unpack structs and enums to and from the EtherCAT
//! wire format: packed bits, little endian words.
//!
//! Most types in consuming crates will use the derives re-exported from
//! `catline-wire-derive` instead of implementing these traits by hand.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]
#![deny(unused_qualifications)]
#![deny(rustdoc::broken_intra_doc_links)]

mod error;
mod impls;

pub use catline_wire_derive::{WireRead, WireReadWrite};
pub use error::WireError;

/// A type that can be decoded from the wire.
pub trait WireRead: Sized {
    /// Unpack this type from the beginning of `buf`.
    fn unpack_from_slice(buf: &[u8]) -> Result<Self, WireError>;
}

/// A type that can be encoded to the wire.
pub trait WireWrite {
    /// Pack the type and write it into the beginning of `buf`.
    ///
    /// # Panics
    ///
    /// This method must panic if `buf` is too short to hold the packed data.
    fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8];

    /// Get the length in bytes of this item when packed.
    fn packed_len(&self) -> usize;

    /// Pack the type and write it into the beginning of `buf`, checking the
    /// buffer is long enough first.
    fn pack_to_slice<'buf>(&self, buf: &'buf mut [u8]) -> Result<&'buf [u8], WireError> {
        if buf.len() < self.packed_len() {
            return Err(WireError::WriteBufferTooShort {
                needed: self.packed_len(),
                got: buf.len(),
            });
        }

        Ok(self.pack_to_slice_unchecked(buf))
    }
}

/// A readable type with a known packed size at compile time.
pub trait WireReadSized: WireRead + WireSized {}

impl<T> WireReadSized for T where T: WireRead + WireSized {}

/// A type with a known packed size at compile time.
///
/// Pretty much everything that isn't a `&[u8]` or other unsized view.
pub trait WireSized {
    /// Packed size in bytes.
    const PACKED_LEN: usize;

    /// A `[u8; N]` able to hold the packed representation of this item.
    type Buffer: AsRef<[u8]> + AsMut<[u8]>;

    /// Create a zeroed buffer sized for the packed representation.
    fn buffer() -> Self::Buffer;
}

/// A writable type with a known packed size at compile time.
pub trait WireWriteSized: WireWrite + WireSized {
    /// Pack this item into a fixed size array.
    fn pack(&self) -> Self::Buffer;
}
