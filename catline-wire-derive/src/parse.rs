use crate::help::{
    alternatives_attr, bit_width_attr, check_attrs, enum_repr_ty, flag_attr, usize_attr,
};
use std::ops::Range;
use syn::{DataEnum, DataStruct, DeriveInput, Expr, ExprLit, ExprUnary, Fields, FieldsNamed,
    Ident, Lit, Type, UnOp};

pub struct StructMeta {
    /// Width in bits on the wire.
    pub width_bits: usize,

    pub fields: Vec<FieldMeta>,
}

pub struct FieldMeta {
    pub name: Ident,
    pub ty: Type,
    /// `None` for arrays and path-less types.
    pub ty_name: Option<Ident>,

    pub bits: Range<usize>,
    pub bytes: Range<usize>,

    /// Offset of the starting bit within the starting byte.
    pub bit_offset: usize,

    pub skip: bool,
}

pub fn parse_struct(s: DataStruct, input: &DeriveInput) -> syn::Result<StructMeta> {
    check_attrs(&input.attrs, &["bits", "bytes"])?;

    let Some(width_bits) = bit_width_attr(&input.attrs)? else {
        return Err(syn::Error::new(
            input.ident.span(),
            "struct total width is required, e.g. #[wire(bytes = 8)]",
        ));
    };

    let Fields::Named(FieldsNamed { named: fields, .. }) = s.fields else {
        return Err(syn::Error::new(
            input.ident.span(),
            "only structs with named fields can be derived",
        ));
    };

    let mut position_bits = 0;
    let mut field_meta = Vec::new();

    for field in fields {
        check_attrs(
            &field.attrs,
            &[
                "bits",
                "bytes",
                "skip",
                "pre_skip",
                "pre_skip_bytes",
                "post_skip",
                "post_skip_bytes",
            ],
        )?;

        // Unwrap: named-field struct, so the field always has a name.
        let name = field.ident.unwrap();
        let field_width = bit_width_attr(&field.attrs)?;

        // Ignore this field entirely when packing AND unpacking.
        let skip = flag_attr(&field.attrs, "skip");

        let pre_skip = usize_attr(&field.attrs, "pre_skip")?
            .or(usize_attr(&field.attrs, "pre_skip_bytes")?.map(|bytes| bytes * 8))
            .filter(|_| !skip);

        let post_skip = usize_attr(&field.attrs, "post_skip")?
            .or(usize_attr(&field.attrs, "post_skip_bytes")?.map(|bytes| bytes * 8))
            .filter(|_| !skip);

        position_bits += pre_skip.unwrap_or(0);

        let width = if skip { 0 } else {
            field_width.ok_or_else(|| {
                syn::Error::new(
                    name.span(),
                    "field must have a width attribute, e.g. #[wire(bits = 4)]",
                )
            })?
        };

        let bits = position_bits..(position_bits + width);
        let bytes = (bits.start / 8)..bits.end.div_ceil(8);
        let bit_offset = bits.start % 8;

        if !skip {
            if bytes.len() > 1 && (bit_offset > 0 || width % 8 > 0) {
                return Err(syn::Error::new(
                    name.span(),
                    format!(
                        "multibyte fields must be byte aligned at start and end, bit position {}",
                        position_bits
                    ),
                ));
            }

            if bits.len() < 8 && bytes.len() > 1 {
                return Err(syn::Error::new(
                    name.span(),
                    "fields smaller than 8 bits may not cross byte boundaries",
                ));
            }
        }

        position_bits += width + post_skip.unwrap_or(0);

        let ty_name = match field.ty.clone() {
            Type::Path(path) => path.path.get_ident().cloned(),
            _ => None,
        };

        field_meta.push(FieldMeta {
            name,
            ty: field.ty,
            ty_name,
            bits,
            bytes,
            bit_offset,
            skip,
        });
    }

    if position_bits != width_bits {
        return Err(syn::Error::new(
            input.ident.span(),
            format!(
                "total field width is {} bits, expected {} from struct definition",
                position_bits, width_bits
            ),
        ));
    }

    Ok(StructMeta {
        width_bits,
        fields: field_meta,
    })
}

pub struct EnumMeta {
    pub repr_type: Ident,
    pub variants: Vec<VariantMeta>,
    pub catch_all: Option<Ident>,
}

pub struct VariantMeta {
    pub name: Ident,
    pub discriminant: i128,
    pub alternatives: Vec<i128>,
}

pub fn parse_enum(e: DataEnum, input: &DeriveInput) -> syn::Result<EnumMeta> {
    check_attrs(&input.attrs, &["bits", "bytes"])?;

    let repr_type = enum_repr_ty(&input.attrs, &input.ident)?;

    if ["usize", "isize"].iter().any(|bad| repr_type == bad) {
        return Err(syn::Error::new(
            repr_type.span(),
            "usize and isize reprs change size between targets, use a sized integer",
        ));
    }

    let mut discriminant_accum = -1;
    let mut variants = Vec::new();
    let mut catch_all = None;

    for variant in e.variants {
        check_attrs(&variant.attrs, &["alternatives", "catch_all"])?;

        let name = variant.ident;

        let discriminant = match variant.discriminant {
            Some((
                _,
                Expr::Lit(ExprLit {
                    lit: Lit::Int(lit), ..
                }),
            )) => lit.base10_parse::<i128>()?,
            Some((
                _,
                Expr::Unary(ExprUnary {
                    expr,
                    op: UnOp::Neg(_),
                    ..
                }),
            )) => match *expr {
                Expr::Lit(ExprLit {
                    lit: Lit::Int(lit), ..
                }) => -lit.base10_parse::<i128>()?,
                _ => {
                    return Err(syn::Error::new(
                        name.span(),
                        "invalid discriminant format",
                    ))
                }
            },
            None => discriminant_accum + 1,
            _ => {
                return Err(syn::Error::new(
                    name.span(),
                    "invalid discriminant format",
                ))
            }
        };

        let is_catch_all = flag_attr(&variant.attrs, "catch_all");
        let alternatives = alternatives_attr(&variant.attrs)?;

        if is_catch_all {
            if !alternatives.is_empty() {
                return Err(syn::Error::new(
                    name.span(),
                    "a catch all variant cannot have alternatives",
                ));
            }

            if !matches!(&variant.fields, Fields::Unnamed(f) if f.unnamed.len() == 1) {
                return Err(syn::Error::new(
                    name.span(),
                    "the catch all variant must hold a single unnamed value",
                ));
            }

            if catch_all.replace(name.clone()).is_some() {
                return Err(syn::Error::new(
                    name.span(),
                    "only one catch all variant is allowed",
                ));
            }

            continue;
        }

        discriminant_accum = *alternatives.last().unwrap_or(&discriminant);

        variants.push(VariantMeta {
            name,
            discriminant,
            alternatives,
        });
    }

    Ok(EnumMeta {
        repr_type,
        variants,
        catch_all,
    })
}
