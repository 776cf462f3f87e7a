use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, LitStr};

pub enum Kind {
    Command,
    Event,
}

pub fn derive_message(input: TokenStream, kind: Kind) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let message_type = match extract_name(&input) {
        Ok(Some(custom)) => custom,
        Ok(None) => name.to_string(),
        Err(err) => return err.to_compile_error().into(),
    };

    let (kind_variant, marker) = match kind {
        Kind::Command => (quote!(Command), quote!(::durable_bus::Command)),
        Kind::Event => (quote!(Event), quote!(::durable_bus::Event)),
    };

    let expanded = quote! {
        impl #impl_generics ::durable_bus::Message for #name #ty_generics #where_clause {
            const MESSAGE_TYPE: &'static str = #message_type;
            const KIND: ::durable_bus::MessageKind = ::durable_bus::MessageKind::#kind_variant;
        }

        impl #impl_generics #marker for #name #ty_generics #where_clause {}
    };

    TokenStream::from(expanded)
}

/// Reads `#[message(name = "...")]` from the struct-level attributes.
fn extract_name(input: &DeriveInput) -> syn::Result<Option<String>> {
    let mut name = None;

    for attr in &input.attrs {
        if !attr.path().is_ident("message") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value: LitStr = meta.value()?.parse()?;
                if value.value().is_empty() {
                    return Err(meta.error("message name must not be empty"));
                }
                name = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unsupported message attribute, expected `name`"))
            }
        })?;
    }

    Ok(name)
}
