use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, parse_macro_input};

/// Derive macro for the `ScribeEnum` trait.
///
/// Stores a fieldless enum as its discriminant and also generates the
/// `Codec` and `MapElement` impls, so the enum works with `look_value`
/// and `look_map` directly.
///
/// # Example
///
/// ```ignore
/// use scribe_core::ScribeEnum;
///
/// #[derive(Debug, Clone, Copy, PartialEq, Default, ScribeEnum)]
/// enum Priority {
///     #[default]
///     Low,
///     High = 10,
/// }
/// ```
#[proc_macro_derive(ScribeEnum)]
pub fn derive_scribe_enum(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match derive_scribe_enum_impl(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn derive_scribe_enum_impl(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "ScribeEnum cannot be derived for generic enums",
        ));
    }

    let data = match &input.data {
        syn::Data::Enum(data) => data,
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "ScribeEnum can only be derived for enums",
            ));
        }
    };

    if data.variants.is_empty() {
        return Err(syn::Error::new_spanned(
            input,
            "ScribeEnum cannot be derived for empty enums",
        ));
    }

    let mut variants = Vec::with_capacity(data.variants.len());
    for variant in &data.variants {
        if !matches!(variant.fields, syn::Fields::Unit) {
            return Err(syn::Error::new_spanned(
                variant,
                "ScribeEnum variants cannot carry fields",
            ));
        }
        variants.push(&variant.ident);
    }

    Ok(quote! {
        impl ::scribe_core::ScribeEnum for #name {
            fn to_i32(&self) -> i32 {
                match self {
                    #(Self::#variants => Self::#variants as i32),*
                }
            }

            fn from_i32(value: i32) -> ::std::option::Option<Self> {
                #(
                    if value == Self::#variants as i32 {
                        return ::std::option::Option::Some(Self::#variants);
                    }
                )*
                ::std::option::Option::None
            }
        }

        ::scribe_core::impl_enum_codec!(#name);
    })
}

/// Derive macro for the `Tagged` trait.
///
/// The type key defaults to the type's name. It also becomes an inherent
/// `TYPE_KEY` constant, handy for registering constructors.
///
/// # Example
///
/// ```ignore
/// use scribe_core::{Describe, Scribe, Tagged};
///
/// #[derive(Default, Tagged)]
/// #[tagged(key = "farm")]
/// struct Farm {
///     crops: i32,
/// }
///
/// impl Describe for Farm {
///     fn describe(&mut self, scribe: &mut Scribe) {
///         scribe.look_value("crops", &mut self.crops, 0);
///     }
/// }
/// ```
///
/// # Attributes
///
/// - `#[tagged(key = "name")]` - Use a custom type key
#[proc_macro_derive(Tagged, attributes(tagged))]
pub fn derive_tagged(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match derive_tagged_impl(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn derive_tagged_impl(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let attrs = parse_tagged_attrs(&input.attrs)?;
    let key = attrs.key.unwrap_or_else(|| name.to_string());

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics #name #ty_generics #where_clause {
            pub const TYPE_KEY: &'static str = #key;
        }

        impl #impl_generics ::scribe_core::Tagged for #name #ty_generics #where_clause {
            fn type_key(&self) -> &'static str {
                #key
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }
        }
    })
}

#[derive(Default)]
struct TaggedAttrs {
    key: Option<String>,
}

fn parse_tagged_attrs(attrs: &[syn::Attribute]) -> syn::Result<TaggedAttrs> {
    let mut result = TaggedAttrs::default();

    for attr in attrs {
        if !attr.path().is_ident("tagged") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("key") {
                let value: syn::LitStr = meta.value()?.parse()?;
                if value.value().is_empty() {
                    // An empty key marks a null slot in polymorphic lists.
                    return Err(meta.error("type key cannot be empty"));
                }
                result.key = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unsupported tagged attribute"))
            }
        })?;
    }

    Ok(result)
}
