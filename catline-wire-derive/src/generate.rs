use crate::parse::{EnumMeta, StructMeta};
use proc_macro2::TokenStream;
use quote::quote;
use std::str::FromStr;
use syn::DeriveInput;

fn mask_literal(bits: usize, shift: usize) -> TokenStream {
    let mask = ((1u16 << bits) - 1) << shift;

    TokenStream::from_str(&format!("{:#010b}", mask as u8)).unwrap()
}

pub fn generate_struct(parsed: &StructMeta, input: &DeriveInput, impl_write: bool) -> TokenStream {
    let name = input.ident.clone();
    let size_bytes = parsed.width_bits.div_ceil(8);

    let fields_unpack = parsed.fields.iter().map(|field| {
        let ty = &field.ty;
        let name = &field.name;
        let byte_start = field.bytes.start;
        let bit_start = field.bit_offset;

        if field.skip {
            return quote! {
                #name: Default::default()
            };
        }

        let is_bool = field.ty_name.as_ref().is_some_and(|ty| ty == "bool");
        let is_u8 = field.ty_name.as_ref().is_some_and(|ty| ty == "u8");

        if field.bits.len() <= 8 && field.bytes.len() == 1 {
            let mask = mask_literal(field.bits.len(), bit_start);

            let short = quote! {
                ::catline_wire::WireError::ReadBufferTooShort { needed: #size_bytes, got: buf.len() }
            };

            if is_bool {
                quote! {
                    #name: ((buf.get(#byte_start).ok_or(#short)? & #mask) >> #bit_start) > 0
                }
            } else if is_u8 {
                quote! {
                    #name: (buf.get(#byte_start).ok_or(#short)? & #mask) >> #bit_start
                }
            } else {
                // A sub-byte struct or enum
                quote! {
                    #name: {
                        let masked = (buf.get(#byte_start).ok_or(#short)? & #mask) >> #bit_start;

                        <#ty as ::catline_wire::WireRead>::unpack_from_slice(&[masked])?
                    }
                }
            }
        }
        // Multibyte fields are byte aligned, validated during parse.
        else {
            let byte_end = field.bytes.end;

            quote! {
                #name: <#ty as ::catline_wire::WireRead>::unpack_from_slice(
                    buf.get(#byte_start..#byte_end).ok_or(
                        ::catline_wire::WireError::ReadBufferTooShort { needed: #size_bytes, got: buf.len() }
                    )?
                )?
            }
        }
    });

    let read_impl = quote! {
        impl ::catline_wire::WireRead for #name {
            fn unpack_from_slice(buf: &[u8]) -> Result<Self, ::catline_wire::WireError> {
                let buf = buf.get(0..#size_bytes).ok_or(
                    ::catline_wire::WireError::ReadBufferTooShort { needed: #size_bytes, got: buf.len() }
                )?;

                Ok(Self {
                    #(#fields_unpack),*
                })
            }
        }
    };

    let sized_impl = quote! {
        impl ::catline_wire::WireSized for #name {
            const PACKED_LEN: usize = #size_bytes;

            type Buffer = [u8; #size_bytes];

            fn buffer() -> Self::Buffer {
                [0u8; #size_bytes]
            }
        }
    };

    if !impl_write {
        return quote! {
            #read_impl
            #sized_impl
        };
    }

    let fields_pack = parsed.fields.iter().map(|field| {
        let name = &field.name;
        let ty = &field.ty;
        let byte_start = field.bytes.start;
        let bit_start = field.bit_offset;

        if field.skip {
            return quote! {};
        }

        let is_bool = field.ty_name.as_ref().is_some_and(|ty| ty == "bool");
        let is_u8 = field.ty_name.as_ref().is_some_and(|ty| ty == "u8");

        if (is_bool || is_u8) && field.bytes.len() == 1 {
            let mask = mask_literal(field.bits.len(), bit_start);

            quote! {
                buf[#byte_start] |= ((self.#name as u8) << #bit_start) & #mask;
            }
        } else if field.bytes.len() == 1 {
            let mask = mask_literal(field.bits.len(), bit_start);

            quote! {
                let mut field_buf = [0u8; 1];
                let raw = <#ty as ::catline_wire::WireWrite>::pack_to_slice_unchecked(&self.#name, &mut field_buf)[0];

                buf[#byte_start] |= (raw << #bit_start) & #mask;
            }
        }
        // Multibyte fields are byte aligned, validated during parse.
        else {
            let byte_end = field.bytes.end;

            quote! {
                <#ty as ::catline_wire::WireWrite>::pack_to_slice_unchecked(&self.#name, &mut buf[#byte_start..#byte_end]);
            }
        }
    });

    quote! {
        #read_impl
        #sized_impl

        impl ::catline_wire::WireWrite for #name {
            fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
                let buf = &mut buf[0..#size_bytes];

                buf.fill(0);

                #(#fields_pack)*

                buf
            }

            fn packed_len(&self) -> usize {
                #size_bytes
            }
        }

        impl ::catline_wire::WireWriteSized for #name {
            fn pack(&self) -> Self::Buffer {
                let mut buf = [0u8; #size_bytes];

                <Self as ::catline_wire::WireWrite>::pack_to_slice_unchecked(self, &mut buf);

                buf
            }
        }
    }
}

pub fn generate_enum(
    parsed: &EnumMeta,
    input: &DeriveInput,
    impl_write: bool,
) -> syn::Result<TokenStream> {
    let name = input.ident.clone();
    let repr_type = &parsed.repr_type;

    let unpack_arms = parsed.variants.iter().map(|variant| {
        let value = TokenStream::from_str(&variant.discriminant.to_string()).unwrap();
        let variant_name = &variant.name;

        let alternatives = variant.alternatives.iter().map(|alt| {
            let alt = TokenStream::from_str(&alt.to_string()).unwrap();

            quote! { | #alt }
        });

        quote! {
            #value #(#alternatives)* => Ok(Self::#variant_name),
        }
    });

    let fallthrough = if let Some(catch_all) = &parsed.catch_all {
        quote! { other => Ok(Self::#catch_all(other)), }
    } else {
        quote! { _other => Err(::catline_wire::WireError::InvalidDiscriminant), }
    };

    let read_impl = quote! {
        impl ::catline_wire::WireRead for #name {
            fn unpack_from_slice(buf: &[u8]) -> Result<Self, ::catline_wire::WireError> {
                let raw = <#repr_type as ::catline_wire::WireRead>::unpack_from_slice(buf)?;

                match raw {
                    #(#unpack_arms)*
                    #fallthrough
                }
            }
        }
    };

    let sized_impl = quote! {
        impl ::catline_wire::WireSized for #name {
            const PACKED_LEN: usize = <#repr_type as ::catline_wire::WireSized>::PACKED_LEN;

            type Buffer = <#repr_type as ::catline_wire::WireSized>::Buffer;

            fn buffer() -> Self::Buffer {
                <#repr_type as ::catline_wire::WireSized>::buffer()
            }
        }
    };

    if !impl_write {
        return Ok(quote! {
            #read_impl
            #sized_impl
        });
    }

    let pack_arms = parsed.variants.iter().map(|variant| {
        let value = TokenStream::from_str(&variant.discriminant.to_string()).unwrap();
        let variant_name = &variant.name;

        quote! {
            Self::#variant_name => #value,
        }
    });

    let pack_fallthrough = parsed.catch_all.as_ref().map(|catch_all| {
        quote! { Self::#catch_all(value) => *value, }
    });

    Ok(quote! {
        #read_impl
        #sized_impl

        impl ::catline_wire::WireWrite for #name {
            fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
                let raw: #repr_type = match self {
                    #(#pack_arms)*
                    #pack_fallthrough
                };

                <#repr_type as ::catline_wire::WireWrite>::pack_to_slice_unchecked(&raw, buf)
            }

            fn packed_len(&self) -> usize {
                <#repr_type as ::catline_wire::WireSized>::PACKED_LEN
            }
        }

        impl ::catline_wire::WireWriteSized for #name {
            fn pack(&self) -> Self::Buffer {
                let mut buf = <Self as ::catline_wire::WireSized>::buffer();

                <Self as ::catline_wire::WireWrite>::pack_to_slice_unchecked(self, buf.as_mut());

                buf
            }
        }
    })
}
