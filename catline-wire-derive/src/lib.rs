//! Derive macros for `catline-wire`.
//!
//! Items are packed to the EtherCAT wire format: bit fields packed little
//! endian into bytes, multi byte fields little endian and byte aligned.

#![deny(missing_docs)]

mod generate;
mod help;
mod parse;

use generate::{generate_enum, generate_struct};
use parse::{parse_enum, parse_struct};
use proc_macro::TokenStream;
use syn::{parse_macro_input, Data, DeriveInput};

fn derive(input: DeriveInput, impl_write: bool) -> syn::Result<proc_macro2::TokenStream> {
    match input.clone().data {
        Data::Struct(s) => {
            parse_struct(s, &input).map(|parsed| generate_struct(&parsed, &input, impl_write))
        }
        Data::Enum(e) => {
            parse_enum(e, &input).and_then(|parsed| generate_enum(&parsed, &input, impl_write))
        }
        Data::Union(_) => Err(syn::Error::new(
            input.ident.span(),
            "unions are not supported",
        )),
    }
}

/// Derive `WireRead` (and `WireSized`) for a struct or enum.
#[proc_macro_derive(WireRead, attributes(wire))]
pub fn wire_read(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match derive(input, false) {
        Ok(res) => TokenStream::from(res),
        Err(e) => e.to_compile_error().into(),
    }
}

/// Derive `WireRead`, `WireWrite` and the sized traits for a struct or enum.
#[proc_macro_derive(WireReadWrite, attributes(wire))]
pub fn wire_read_write(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match derive(input, true) {
        Ok(res) => TokenStream::from(res),
        Err(e) => e.to_compile_error().into(),
    }
}
