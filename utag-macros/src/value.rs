use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{DeriveInput, LitStr, parse_macro_input};

pub fn derive_to_value_impl(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match input.data {
        syn::Data::Struct(data) => match data.fields {
            syn::Fields::Named(fields) => fields.named,
            _ => {
                return syn::Error::new_spanned(
                    name,
                    "ToValue only supports structs with named fields",
                )
                .to_compile_error()
                .into();
            }
        },
        _ => {
            return syn::Error::new_spanned(name, "ToValue only supports structs")
                .to_compile_error()
                .into();
        }
    };

    let mut inserts = Vec::with_capacity(fields.len());
    for f in &fields {
        let Some(field_name) = f.ident.as_ref() else {
            continue;
        };
        let (key, ignore) = match parse_field_attrs(f, field_name.to_string()) {
            Ok(parsed) => parsed,
            Err(e) => return e.to_compile_error().into(),
        };
        if ignore {
            continue;
        }
        let key_lit = LitStr::new(&key, Span::call_site());
        inserts.push(quote! {
            map.insert(
                ::std::string::String::from(#key_lit),
                ::utag::value::ToValue::to_value(&self.#field_name),
            );
        });
    }

    TokenStream::from(quote! {
        impl #impl_generics ::utag::value::ToValue for #name #ty_generics #where_clause {
            fn to_value(&self) -> ::utag::value::Value {
                let mut map = ::std::collections::HashMap::new();
                #(#inserts)*
                ::utag::value::Value::Map(map)
            }
        }
    })
}

/// `(key, ignore)` for a field.
fn parse_field_attrs(field: &syn::Field, mut name: String) -> syn::Result<(String, bool)> {
    let mut ignore = false;

    for attr in &field.attrs {
        if !attr.path().is_ident("value") {
            continue;
        }
        // #[value("key")]
        if let Ok(s) = attr.parse_args::<LitStr>() {
            name = s.value();
            continue;
        }
        // #[value(ignore)], #[value(rename = "key")]
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("ignore") {
                ignore = true;
                Ok(())
            } else if meta.path.is_ident("rename") {
                let s: LitStr = meta.value()?.parse()?;
                name = s.value();
                Ok(())
            } else {
                Err(meta.error("expected `ignore` or `rename = \"...\"`"))
            }
        })?;
    }
    Ok((name, ignore))
}
