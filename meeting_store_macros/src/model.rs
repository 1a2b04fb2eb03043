use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, LitBool, LitStr};

pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let attrs = match parse_container_attrs(&input) {
        Ok(attrs) => attrs,
        Err(err) => return err.to_compile_error().into(),
    };
    let id_field = match extract_id_field(&input) {
        Ok(field) => field,
        Err(err) => return err.to_compile_error().into(),
    };

    let collection = attrs
        .collection
        .unwrap_or_else(|| to_snake_case(&name.to_string()));
    let meeting_scoped = attrs.meeting_scoped;

    let expanded = quote! {
        impl ::meeting_store::Model for #name {
            const COLLECTION: &'static str = #collection;
            const MEETING_SCOPED: bool = #meeting_scoped;

            fn id(&self) -> ::meeting_store::Id {
                self.#id_field
            }
        }
    };

    TokenStream::from(expanded)
}

struct ContainerAttrs {
    collection: Option<String>,
    meeting_scoped: bool,
}

fn parse_container_attrs(input: &DeriveInput) -> syn::Result<ContainerAttrs> {
    let mut attrs = ContainerAttrs {
        collection: None,
        meeting_scoped: true,
    };

    for attr in &input.attrs {
        if !attr.path().is_ident("model") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("collection") {
                let value: LitStr = meta.value()?.parse()?;
                attrs.collection = Some(value.value());
                Ok(())
            } else if meta.path.is_ident("meeting_scoped") {
                let value: LitBool = meta.value()?.parse()?;
                attrs.meeting_scoped = value.value;
                Ok(())
            } else {
                Err(meta.error("expected `collection` or `meeting_scoped`"))
            }
        })?;
    }

    Ok(attrs)
}

fn extract_id_field(input: &DeriveInput) -> syn::Result<syn::Ident> {
    let Data::Struct(data_struct) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "Model derive: only structs with named fields are supported",
        ));
    };
    let Fields::Named(fields) = &data_struct.fields else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "Model derive: only structs with named fields are supported",
        ));
    };

    for field in &fields.named {
        for attr in &field.attrs {
            if !attr.path().is_ident("model") {
                continue;
            }
            let mut is_id = false;
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("id") {
                    is_id = true;
                }
                Ok(())
            })?;
            if is_id {
                if let Some(ident) = &field.ident {
                    return Ok(ident.clone());
                }
            }
        }
    }

    // Default: look for a field named "id"
    fields
        .named
        .iter()
        .filter_map(|field| field.ident.as_ref())
        .find(|ident| *ident == "id")
        .cloned()
        .ok_or_else(|| {
            syn::Error::new_spanned(
                &input.ident,
                "Model derive: no field marked with #[model(id)] and no field named `id`",
            )
        })
}

/// `MotionBlock` becomes `motion_block`.
fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, ch) in s.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(ch.to_lowercase());
        } else {
            result.push(ch);
        }
    }
    result
}
