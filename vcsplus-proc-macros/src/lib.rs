extern crate proc_macro;

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::Data::Enum;
use syn::{DeriveInput, Expr, ExprLit, Lit, Meta, Variant};

/// Give a fieldless enum a stable string name per variant.
///
/// Each variant may carry a `#[name = "..."]` attribute; variants without one use their identifier.
/// The derive generates:
/// * an inherent `ALL` constant listing every variant in declaration order
/// * an inherent `name(self) -> &'static str`
/// * `std::fmt::Display`, writing the name
/// * `std::str::FromStr` with `Err = String`, matching names case-insensitively
/// * `serde::Serialize` / `serde::Deserialize`, encoding values as their names
///
/// The names are persisted in save states and config files, so renaming one is a format break.
#[proc_macro_derive(NamedVariants, attributes(name))]
pub fn named_variants(input: TokenStream) -> TokenStream {
    let ast: DeriveInput = syn::parse(input).expect("unable to parse input");

    let ident = &ast.ident;

    let Enum(data) = &ast.data else {
        panic!("NamedVariants derive macro can only be applied to enums; {ident} is not an enum")
    };

    let variants: Vec<_> = data
        .variants
        .iter()
        .map(|variant| {
            let variant_ident = &variant.ident;
            if !variant.fields.is_empty() {
                panic!("NamedVariants macro only supports fieldless variants; {ident}::{variant_ident} has fields");
            }

            (variant_ident, variant_name(variant))
        })
        .collect();

    let all_entries = variants.iter().map(|(variant_ident, _)| quote! { Self::#variant_ident });

    let name_arms = variants.iter().map(|(variant_ident, variant_name)| {
        quote! {
            Self::#variant_ident => #variant_name
        }
    });

    let from_str_arms = variants.iter().map(|(variant_ident, variant_name)| {
        let lowercase = variant_name.to_ascii_lowercase();
        quote! {
            #lowercase => Ok(Self::#variant_ident)
        }
    });

    let err_fmt_string = format!("invalid {ident} name: '{{}}'");
    let visitor_struct_name = format_ident!("__{}NameVisitorGenerated", ident);
    let expecting_fmt_string = format!("a string naming a {ident}");

    let gen = quote! {
        impl #ident {
            pub const ALL: &'static [Self] = &[#(#all_entries,)*];

            #[must_use]
            pub fn name(self) -> &'static str {
                match self {
                    #(#name_arms,)*
                }
            }
        }

        impl std::fmt::Display for #ident {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }

        impl std::str::FromStr for #ident {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    #(#from_str_arms,)*
                    _ => Err(format!(#err_fmt_string, s)),
                }
            }
        }

        impl serde::Serialize for #ident {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(self.name())
            }
        }

        struct #visitor_struct_name;

        impl<'de> serde::de::Visitor<'de> for #visitor_struct_name {
            type Value = #ident;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(formatter, #expecting_fmt_string)
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse().map_err(serde::de::Error::custom)
            }
        }

        impl<'de> serde::Deserialize<'de> for #ident {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                deserializer.deserialize_str(#visitor_struct_name)
            }
        }
    };

    gen.into()
}

fn variant_name(variant: &Variant) -> String {
    for attr in &variant.attrs {
        if !attr.path().is_ident("name") {
            continue;
        }

        let Meta::NameValue(name_value) = &attr.meta else {
            panic!("name attribute must have the form #[name = \"...\"]");
        };
        let Expr::Lit(ExprLit { lit: Lit::Str(lit_str), .. }) = &name_value.value else {
            panic!("name attribute value must be a string literal");
        };

        return lit_str.value();
    }

    variant.ident.to_string()
}
