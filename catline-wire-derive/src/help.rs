use syn::{Attribute, Ident, LitInt};

/// Ensure every `#[wire(...)]` key on the item is one we understand.
pub fn check_attrs(attrs: &[Attribute], valid: &[&str]) -> syn::Result<()> {
    for attr in attrs.iter().filter(|attr| attr.path().is_ident("wire")) {
        attr.parse_nested_meta(|meta| {
            if valid.iter().any(|v| meta.path.is_ident(v)) {
                // Consume the value if one is present so parsing can continue.
                if let Ok(value) = meta.value() {
                    value.parse::<syn::Expr>()?;
                }

                Ok(())
            } else {
                Err(meta.error(format!(
                    "unrecognised attribute, expected one of {}",
                    valid.join(", ")
                )))
            }
        })?;
    }

    Ok(())
}

/// Find `#[wire(name = <int>)]` on the given attributes.
pub fn usize_attr(attrs: &[Attribute], name: &str) -> syn::Result<Option<usize>> {
    let mut found = None;

    for attr in attrs.iter().filter(|attr| attr.path().is_ident("wire")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident(name) {
                let lit: LitInt = meta.value()?.parse()?;

                found = Some(lit.base10_parse::<usize>()?);
            } else if let Ok(value) = meta.value() {
                value.parse::<syn::Expr>()?;
            }

            Ok(())
        })?;
    }

    Ok(found)
}

/// Check for a bare `#[wire(name)]` flag.
pub fn flag_attr(attrs: &[Attribute], name: &str) -> bool {
    let mut found = false;

    for attr in attrs.iter().filter(|attr| attr.path().is_ident("wire")) {
        let _ = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident(name) {
                found = true;
            } else if let Ok(value) = meta.value() {
                value.parse::<syn::Expr>()?;
            }

            Ok(())
        });
    }

    found
}

/// Width in bits from either `#[wire(bits = N)]` or `#[wire(bytes = N)]`.
pub fn bit_width_attr(attrs: &[Attribute]) -> syn::Result<Option<usize>> {
    let bits = usize_attr(attrs, "bits")?;
    let bytes = usize_attr(attrs, "bytes")?.map(|bytes| bytes * 8);

    Ok(bits.or(bytes))
}

/// Find `#[wire(alternatives = [a, b, c])]` on an enum variant.
pub fn alternatives_attr(attrs: &[Attribute]) -> syn::Result<Vec<i128>> {
    let mut found = Vec::new();

    for attr in attrs.iter().filter(|attr| attr.path().is_ident("wire")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("alternatives") {
                let arr: syn::ExprArray = meta.value()?.parse()?;

                for elem in arr.elems {
                    match elem {
                        syn::Expr::Lit(syn::ExprLit {
                            lit: syn::Lit::Int(lit),
                            ..
                        }) => found.push(lit.base10_parse::<i128>()?),
                        other => {
                            return Err(syn::Error::new_spanned(
                                other,
                                "alternatives must be integer literals",
                            ))
                        }
                    }
                }
            } else if let Ok(value) = meta.value() {
                value.parse::<syn::Expr>()?;
            }

            Ok(())
        })?;
    }

    Ok(found)
}

/// The `#[repr(uN/iN)]` type of an enum.
pub fn enum_repr_ty(attrs: &[Attribute], ident: &Ident) -> syn::Result<Ident> {
    let mut found = None;

    for attr in attrs.iter().filter(|attr| attr.path().is_ident("repr")) {
        attr.parse_nested_meta(|meta| {
            if let Some(ident) = meta.path.get_ident() {
                found = Some(ident.clone());
            }

            Ok(())
        })?;
    }

    found.ok_or_else(|| {
        syn::Error::new(
            ident.span(),
            "enums must have a #[repr(...)] attribute of u8, u16, u32, i8, i16 or i32",
        )
    })
}
