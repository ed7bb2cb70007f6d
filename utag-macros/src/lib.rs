mod assets;
mod value;

use proc_macro::TokenStream;

/// Embeds every template library matching a glob pattern (relative to the
/// crate root) and expands to a `Vec<(&str, &str)>` of `(path, content)`
/// pairs for `MemorySource::load_assets`.
#[proc_macro]
pub fn template_assets(input: TokenStream) -> TokenStream {
    assets::template_assets_impl(input)
}

/// Derives `ToValue` for a struct with named fields, producing a `Value::Map`.
///
/// Field attributes: `#[value("key")]` or `#[value(rename = "key")]` to change
/// the key, `#[value(ignore)]` to skip the field.
#[proc_macro_derive(ToValue, attributes(value))]
pub fn derive_to_value(input: TokenStream) -> TokenStream {
    value::derive_to_value_impl(input)
}
