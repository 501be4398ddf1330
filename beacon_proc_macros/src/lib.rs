extern crate proc_macro;

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Error, Fields, LitStr, parse_macro_input};

/// Derives `beacon::Watchable` for a struct with named fields.
///
/// Every field becomes an accessor that report definitions can name. The
/// field value is converted with `serde_json::to_value`, so each exposed
/// field must implement `serde::Serialize`.
///
/// # Example
///
/// ```rust,ignore
/// use beacon::Watchable;
///
/// #[derive(Watchable)]
/// struct Post {
///     title: String,
///     views: u64,
///     #[watch(rename = "author")]
///     user: Option<String>,
///     #[watch(skip)]
///     body: String,
/// }
/// ```
///
/// # Errors
///
/// This macro will emit a compile error if:
/// - The annotated item is not a struct
/// - The struct has tuple or unit fields
/// - A `#[watch(...)]` attribute holds anything but `skip` or `rename = "..."`
#[proc_macro_derive(Watchable, attributes(watch))]
pub fn derive_watchable(item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    match expand(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(e) => TokenStream::from(e.to_compile_error()),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let struct_name = &input.ident;

    let fields = match &input.data {
        Data::Struct(data_struct) => match &data_struct.fields {
            Fields::Named(fields_named) => &fields_named.named,
            _ => {
                return Err(Error::new_spanned(
                    struct_name,
                    "Watchable can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(Error::new_spanned(
                struct_name,
                "Watchable can only be derived for structs",
            ));
        }
    };

    let mut arms = Vec::with_capacity(fields.len());
    for field in fields {
        let Some(ident) = &field.ident else {
            continue;
        };
        let options = FieldOptions::parse(field)?;
        if options.skip {
            continue;
        }
        let accessor = options.rename.unwrap_or_else(|| ident.to_string());
        arms.push(quote! {
            #accessor => ::core::option::Option::Some(::beacon::__private::to_value(&self.#ident)),
        });
    }

    let model_name = struct_name.to_string();
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::beacon::Watchable for #struct_name #ty_generics #where_clause {
            fn attribute(&self, name: &str) -> ::core::option::Option<::beacon::__private::Value> {
                match name {
                    #(#arms)*
                    _ => ::core::option::Option::None,
                }
            }

            fn model_name(&self) -> &str {
                #model_name
            }
        }
    })
}

#[derive(Default)]
struct FieldOptions {
    skip: bool,
    rename: Option<String>,
}

impl FieldOptions {
    fn parse(field: &syn::Field) -> syn::Result<Self> {
        let mut options = Self::default();
        for attr in field.attrs.iter().filter(|a| a.path().is_ident("watch")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    options.skip = true;
                    Ok(())
                } else if meta.path.is_ident("rename") {
                    let value: LitStr = meta.value()?.parse()?;
                    options.rename = Some(value.value());
                    Ok(())
                } else {
                    Err(meta.error("expected `skip` or `rename = \"...\"`"))
                }
            })?;
        }
        Ok(options)
    }
}
