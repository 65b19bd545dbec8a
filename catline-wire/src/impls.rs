//! Built in implementations for primitives and a few container types.

use crate::{WireError, WireRead, WireReadSized, WireSized, WireWrite, WireWriteSized};

macro_rules! impl_primitive_wire_field {
    ($ty:ty, $size:expr) => {
        impl WireWrite for $ty {
            fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
                let chunk = &mut buf[0..$size];

                chunk.copy_from_slice(&self.to_le_bytes());

                chunk
            }

            fn packed_len(&self) -> usize {
                $size
            }
        }

        impl WireRead for $ty {
            fn unpack_from_slice(buf: &[u8]) -> Result<Self, WireError> {
                buf.get(0..$size)
                    .ok_or(WireError::ReadBufferTooShort {
                        needed: $size,
                        got: buf.len(),
                    })
                    .and_then(|raw| {
                        raw.try_into().map_err(|_| WireError::ReadBufferTooShort {
                            needed: $size,
                            got: raw.len(),
                        })
                    })
                    .map(Self::from_le_bytes)
            }
        }

        impl WireSized for $ty {
            const PACKED_LEN: usize = $size;

            type Buffer = [u8; $size];

            fn buffer() -> Self::Buffer {
                [0u8; $size]
            }
        }

        impl WireWriteSized for $ty {
            fn pack(&self) -> Self::Buffer {
                self.to_le_bytes()
            }
        }
    };
}

impl_primitive_wire_field!(u8, 1);
impl_primitive_wire_field!(u16, 2);
impl_primitive_wire_field!(u32, 4);
impl_primitive_wire_field!(u64, 8);
impl_primitive_wire_field!(i8, 1);
impl_primitive_wire_field!(i16, 2);
impl_primitive_wire_field!(i32, 4);
impl_primitive_wire_field!(i64, 8);

impl WireWrite for bool {
    fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
        buf[0] = *self as u8;

        &buf[0..1]
    }

    fn packed_len(&self) -> usize {
        1
    }
}

impl WireRead for bool {
    fn unpack_from_slice(buf: &[u8]) -> Result<Self, WireError> {
        let raw = buf.first().ok_or(WireError::ReadBufferTooShort {
            needed: 1,
            got: 0,
        })?;

        Ok(*raw != 0)
    }
}

impl WireSized for bool {
    const PACKED_LEN: usize = 1;

    type Buffer = [u8; 1];

    fn buffer() -> Self::Buffer {
        [0u8; 1]
    }
}

impl WireWriteSized for bool {
    fn pack(&self) -> Self::Buffer {
        [*self as u8]
    }
}

impl WireWrite for () {
    fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
        &buf[0..0]
    }

    fn packed_len(&self) -> usize {
        0
    }
}

impl WireRead for () {
    fn unpack_from_slice(_buf: &[u8]) -> Result<Self, WireError> {
        Ok(())
    }
}

impl WireSized for () {
    const PACKED_LEN: usize = 0;

    type Buffer = [u8; 0];

    fn buffer() -> Self::Buffer {
        []
    }
}

impl WireWriteSized for () {
    fn pack(&self) -> Self::Buffer {
        []
    }
}

impl<const N: usize> WireWrite for [u8; N] {
    fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
        let chunk = &mut buf[0..N];

        chunk.copy_from_slice(self);

        chunk
    }

    fn packed_len(&self) -> usize {
        N
    }
}

impl<const N: usize> WireRead for [u8; N] {
    fn unpack_from_slice(buf: &[u8]) -> Result<Self, WireError> {
        buf.get(0..N)
            .ok_or(WireError::ReadBufferTooShort {
                needed: N,
                got: buf.len(),
            })
            .and_then(|raw| {
                raw.try_into().map_err(|_| WireError::ReadBufferTooShort {
                    needed: N,
                    got: raw.len(),
                })
            })
    }
}

impl<const N: usize> WireSized for [u8; N] {
    const PACKED_LEN: usize = N;

    type Buffer = [u8; N];

    fn buffer() -> Self::Buffer {
        [0u8; N]
    }
}

impl<const N: usize> WireWriteSized for [u8; N] {
    fn pack(&self) -> Self::Buffer {
        *self
    }
}

impl WireWrite for [u8] {
    fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
        let chunk = &mut buf[0..self.len()];

        chunk.copy_from_slice(self);

        chunk
    }

    fn packed_len(&self) -> usize {
        self.len()
    }
}

impl<T> WireWrite for &T
where
    T: WireWrite + ?Sized,
{
    fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
        (**self).pack_to_slice_unchecked(buf)
    }

    fn packed_len(&self) -> usize {
        (**self).packed_len()
    }
}

/// A "visible string": printable characters in the ASCII range, as EtherCAT
/// device names are specified to be.
impl<const N: usize> WireRead for heapless::String<N> {
    fn unpack_from_slice(buf: &[u8]) -> Result<Self, WireError> {
        let mut out = heapless::String::new();

        out.push_str(core::str::from_utf8(buf).map_err(|_| WireError::InvalidUtf8)?)
            .map_err(|_| WireError::Capacity)?;

        Ok(out)
    }
}

impl<const N: usize> WireWrite for heapless::String<N> {
    fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
        let chunk = &mut buf[0..self.len()];

        chunk.copy_from_slice(self.as_bytes());

        chunk
    }

    fn packed_len(&self) -> usize {
        self.len()
    }
}

/// Decode as many `T` as the buffer holds, erroring when more are present
/// than the `heapless::Vec` can store.
impl<T, const N: usize> WireRead for heapless::Vec<T, N>
where
    T: WireReadSized,
    <T as WireSized>::Buffer: Sized,
{
    fn unpack_from_slice(buf: &[u8]) -> Result<Self, WireError> {
        buf.chunks_exact(T::PACKED_LEN)
            .map(T::unpack_from_slice)
            .collect::<Result<heapless::Vec<_, N>, WireError>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_roundtrip() {
        let mut buf = [0u8; 4];

        0xaabb_ccddu32.pack_to_slice_unchecked(&mut buf);

        assert_eq!(buf, [0xdd, 0xcc, 0xbb, 0xaa]);
        assert_eq!(u32::unpack_from_slice(&buf), Ok(0xaabb_ccddu32));
    }

    #[test]
    fn short_buffer() {
        assert_eq!(
            u16::unpack_from_slice(&[0xff]),
            Err(WireError::ReadBufferTooShort { needed: 2, got: 1 })
        );
    }

    #[test]
    fn vec_of_u16() {
        let raw = [0x11u8, 0x22, 0x33, 0x44];

        let decoded = heapless::Vec::<u16, 4>::unpack_from_slice(&raw).unwrap();

        assert_eq!(decoded.as_slice(), &[0x2211, 0x4433]);
    }
}
