use proc_macro::TokenStream;
use quote::quote;
use syn::{
    parse_macro_input, punctuated::Punctuated, spanned::Spanned, Attribute, Data, DeriveInput,
    Error, Fields, GenericArgument, Lit, Meta, MetaNameValue, PathArguments, Result, Token, Type,
};

#[proc_macro_derive(Model, attributes(model))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    match impl_model(parse_macro_input!(input as DeriveInput)) {
        Ok(tokens) => tokens,
        Err(err) => err.to_compile_error().into(),
    }
}

fn impl_model(input: DeriveInput) -> Result<TokenStream> {
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(Error::new(
                    input.span(),
                    "#[derive(Model)] requires named fields",
                ));
            }
        },
        _ => {
            return Err(Error::new(
                input.span(),
                "#[derive(Model)] only supports structs",
            ));
        }
    };

    let name = &input.ident;
    let struct_config = StructConfig::from_attrs(&input.attrs)?;
    let table = struct_config
        .table
        .unwrap_or_else(|| snake_case(&name.to_string()));

    let mut field_defs = Vec::new();
    let mut getters = Vec::new();
    let mut setters = Vec::new();

    for field in fields {
        let ident = field
            .ident
            .as_ref()
            .ok_or_else(|| Error::new(field.span(), "expected a named field"))?;
        let config = FieldConfig::from_attrs(&field.attrs)?;
        let field_name = ident.to_string();
        let column = config.column.unwrap_or_else(|| snake_case(&field_name));
        let field_type = field_type_ident(&field.ty)?;
        let type_name = type_name(&field.ty);

        let mut def = quote! {
            ::optlock::FieldDef::new(#field_name, ::optlock::FieldType::#field_type)
                .column(#column)
                .type_name(#type_name)
        };
        if config.primary_key {
            def = quote! { #def.primary_key() };
        }
        if config.auto_increment {
            def = quote! { #def.auto_increment() };
        }
        if !config.updatable {
            def = quote! { #def.updatable(false) };
        }
        for tag in &config.tags {
            def = quote! { #def.tag(#tag) };
        }
        field_defs.push(def);

        getters.push(quote! {
            #column => ::std::option::Option::Some(
                ::optlock::ToFieldValue::to_field_value(&self.#ident),
            ),
        });
        setters.push(quote! {
            #column => {
                self.#ident = ::optlock::FromFieldValue::from_field_value(value)?;
                ::std::result::Result::Ok(())
            }
        });
    }

    Ok(quote! {
        impl ::optlock::Model for #name {
            fn model_schema() -> &'static ::optlock::ModelSchema {
                static SCHEMA: ::std::sync::OnceLock<::optlock::ModelSchema> =
                    ::std::sync::OnceLock::new();
                SCHEMA.get_or_init(|| {
                    ::optlock::ModelSchema::builder(#table)
                        #( .field(#field_defs) )*
                        .build()
                })
            }

            fn column_value(&self, column: &str) -> ::std::option::Option<::optlock::FieldValue> {
                match column {
                    #( #getters )*
                    _ => ::std::option::Option::None,
                }
            }

            fn set_column(
                &mut self,
                column: &str,
                value: ::optlock::FieldValue,
            ) -> ::optlock::Result<()> {
                match column {
                    #( #setters )*
                    _ => ::std::result::Result::Err(::optlock::Error::UnknownColumn(
                        column.to_string(),
                    )),
                }
            }
        }
    }
    .into())
}

struct StructConfig {
    table: Option<String>,
}

impl StructConfig {
    fn from_attrs(attrs: &[Attribute]) -> Result<Self> {
        let mut config = StructConfig { table: None };
        for attr in attrs {
            if !attr.path().is_ident("model") {
                continue;
            }
            let metas: Punctuated<Meta, Token![,]> =
                attr.parse_args_with(Punctuated::parse_terminated)?;
            for meta in metas {
                match meta {
                    Meta::NameValue(MetaNameValue { path, value, .. })
                        if path.is_ident("table") =>
                    {
                        config.table = Some(expect_str(value, "table")?);
                    }
                    other => {
                        return Err(Error::new(
                            other.span(),
                            "expected `table = \"...\"` inside #[model(...)] on a struct",
                        ));
                    }
                }
            }
        }
        Ok(config)
    }
}

struct FieldConfig {
    primary_key: bool,
    auto_increment: bool,
    updatable: bool,
    column: Option<String>,
    tags: Vec<String>,
}

impl FieldConfig {
    fn from_attrs(attrs: &[Attribute]) -> Result<Self> {
        let mut config = FieldConfig {
            primary_key: false,
            auto_increment: false,
            updatable: true,
            column: None,
            tags: Vec::new(),
        };
        for attr in attrs {
            if !attr.path().is_ident("model") {
                continue;
            }
            let metas: Punctuated<Meta, Token![,]> =
                attr.parse_args_with(Punctuated::parse_terminated)?;
            for meta in metas {
                match meta {
                    Meta::Path(path) if path.is_ident("primary_key") => {
                        config.primary_key = true;
                    }
                    Meta::Path(path) if path.is_ident("auto_increment") => {
                        config.auto_increment = true;
                    }
                    Meta::NameValue(MetaNameValue { path, value, .. }) => {
                        if path.is_ident("column") {
                            config.column = Some(expect_str(value, "column")?);
                        } else if path.is_ident("tag") {
                            config.tags.push(expect_str(value, "tag")?);
                        } else if path.is_ident("updatable") {
                            config.updatable = expect_bool(value, "updatable")?;
                        } else {
                            return Err(Error::new(path.span(), "unsupported model attribute key"));
                        }
                    }
                    other => {
                        return Err(Error::new(
                            other.span(),
                            "expected `primary_key`, `auto_increment`, or `key = value` pairs \
                             inside #[model(...)]",
                        ));
                    }
                }
            }
        }
        Ok(config)
    }
}

/// Map a declared type to its `FieldType` variant. `Option<T>` maps to the
/// inner type's variant.
fn field_type_ident(ty: &Type) -> Result<proc_macro2::Ident> {
    let ty = unwrap_option(ty);
    let ident = last_segment_ident(ty)
        .ok_or_else(|| Error::new(ty.span(), "unsupported model field type"))?;
    let variant = match ident.as_str() {
        "bool" => "Bool",
        "i8" | "i16" | "i32" | "i64" | "isize" => "Int",
        "u8" | "u16" | "u32" | "u64" | "usize" => "UInt",
        "f32" | "f64" => "Float",
        "String" => "Text",
        "Vec" => "Bytes",
        "Uuid" => "Opaque16",
        "Ulid" => "Opaque16",
        "DateTime" | "NaiveDateTime" => "Timestamp",
        other => {
            return Err(Error::new(
                ty.span(),
                format!("unsupported model field type: {other}"),
            ));
        }
    };
    Ok(proc_macro2::Ident::new(variant, ty.span()))
}

fn unwrap_option(ty: &Type) -> &Type {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            if segment.ident == "Option" {
                if let PathArguments::AngleBracketed(args) = &segment.arguments {
                    if let Some(GenericArgument::Type(inner)) = args.args.first() {
                        return inner;
                    }
                }
            }
        }
    }
    ty
}

fn last_segment_ident(ty: &Type) -> Option<String> {
    match ty {
        Type::Path(type_path) => type_path
            .path
            .segments
            .last()
            .map(|segment| segment.ident.to_string()),
        _ => None,
    }
}

fn type_name(ty: &Type) -> String {
    quote!(#ty).to_string().replace(' ', "")
}

fn expect_str(expr: syn::Expr, name: &str) -> Result<String> {
    match expr {
        syn::Expr::Lit(expr_lit) => {
            if let Lit::Str(s) = expr_lit.lit {
                Ok(s.value())
            } else {
                Err(Error::new(
                    expr_lit.span(),
                    format!("{name} must be a string literal"),
                ))
            }
        }
        other => Err(Error::new(
            other.span(),
            format!("{name} must be a string literal"),
        )),
    }
}

fn expect_bool(expr: syn::Expr, name: &str) -> Result<bool> {
    match expr {
        syn::Expr::Lit(expr_lit) => {
            if let Lit::Bool(b) = expr_lit.lit {
                Ok(b.value())
            } else {
                Err(Error::new(
                    expr_lit.span(),
                    format!("{name} must be a boolean literal"),
                ))
            }
        }
        other => Err(Error::new(
            other.span(),
            format!("{name} must be a boolean literal"),
        )),
    }
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let chars: Vec<char> = name.chars().collect();
    for (i, ch) in chars.iter().enumerate() {
        if ch.is_ascii_uppercase() {
            let prev_lower =
                i > 0 && (chars[i - 1].is_ascii_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).is_some_and(|c| c.is_ascii_lowercase());
            if i > 0 && (prev_lower || (chars[i - 1].is_ascii_uppercase() && next_lower)) {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(*ch);
        }
    }
    out
}
