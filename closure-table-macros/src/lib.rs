use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::ext::IdentExt;
use syn::{
    parse_macro_input, spanned::Spanned, Attribute, Data, DeriveInput, Fields, Ident, Path, Type,
};

/// Implements `closure_table::TreeNode` for a SeaORM `Model`.
///
/// The struct must live in the same module as its `Entity`, `ActiveModel` and
/// `Column` types (the layout `DeriveEntityModel` produces), and
/// `#[tree_node(closure_module = "...")]` must point at the closure entity.
#[proc_macro_derive(TreeNode, attributes(tree_node))]
pub fn derive_tree_node(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match impl_tree_node(&input) {
        Ok(tokens) => tokens,
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct Options {
    id_field: Option<String>,
    id_type: Option<Type>,
    parent_field: Option<String>,
    closure_module: Option<Path>,
    entity_name: Option<String>,
    closure_name: Option<String>,
    ancestor_field: Option<String>,
    descendant_field: Option<String>,
    depth_field: Option<String>,
    delete_mode: Option<syn::LitStr>,
}

fn impl_tree_node(input: &DeriveInput) -> syn::Result<TokenStream> {
    let struct_ident = &input.ident;

    let data_struct = match &input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                input.span(),
                "TreeNode can only be derived for structs",
            ))
        }
    };

    let mut options = Options::default();
    let mut table_name: Option<String> = None;

    for attr in &input.attrs {
        if attr.path().is_ident("tree_node") {
            parse_tree_node_attr(attr, &mut options)?;
        }

        if attr.path().is_ident("sea_orm") {
            if let Some(name) = parse_sea_orm_table_name(attr)? {
                table_name = Some(name);
            }
        }
    }

    let id_field_name = options.id_field.unwrap_or_else(|| "id".to_string());
    let parent_field_name = options
        .parent_field
        .unwrap_or_else(|| "parent_id".to_string());
    let ancestor_field_name = options
        .ancestor_field
        .unwrap_or_else(|| "ancestor_id".to_string());
    let descendant_field_name = options
        .descendant_field
        .unwrap_or_else(|| "descendant_id".to_string());
    let depth_field_name = options.depth_field.unwrap_or_else(|| "depth".to_string());

    let id_field_ident = Ident::new(&id_field_name, struct_ident.span());
    let parent_field_ident = Ident::new(&parent_field_name, struct_ident.span());
    let ancestor_field_ident = Ident::new(&ancestor_field_name, struct_ident.span());
    let descendant_field_ident = Ident::new(&descendant_field_name, struct_ident.span());
    let depth_field_ident = Ident::new(&depth_field_name, struct_ident.span());

    let mut id_field_type: Option<Type> = options.id_type.clone();
    let mut has_parent_field = false;

    if let Fields::Named(ref fields) = data_struct.fields {
        for field in &fields.named {
            if let Some(ident) = &field.ident {
                if ident == &id_field_ident && id_field_type.is_none() {
                    id_field_type = Some(field.ty.clone());
                }
                if ident == &parent_field_ident {
                    has_parent_field = true;
                }
            }
        }
    } else {
        return Err(syn::Error::new(
            data_struct.fields.span(),
            "TreeNode requires named fields",
        ));
    }

    if !has_parent_field {
        return Err(syn::Error::new(
            struct_ident.span(),
            format!("TreeNode requires a nullable `{parent_field_name}` field; set `parent_field = ...` in #[tree_node]"),
        ));
    }

    let id_type = id_field_type.ok_or_else(|| {
        syn::Error::new(
            struct_ident.span(),
            "Unable to determine id field type; specify `id_type = ...` in #[tree_node]",
        )
    })?;

    let closure_module_path = options
        .closure_module
        .ok_or_else(|| syn::Error::new(struct_ident.span(), "`closure_module` must be set"))?;

    let base_table = table_name.unwrap_or_else(|| struct_ident.unraw().to_string());

    // `DeriveEntityModel` structs are all called `Model`; the table name is
    // what tells two trees (and their lock keys) apart.
    let entity_name = options
        .entity_name
        .unwrap_or_else(|| to_pascal_case(&base_table));
    let closure_name = options.closure_name.unwrap_or_else(|| {
        if entity_name.ends_with("Closure") {
            entity_name.clone()
        } else {
            format!("{}Closure", entity_name)
        }
    });


    let delete_mode = match options.delete_mode {
        Some(mode) => {
            let variant = match mode.value().as_str() {
                "restrict" => format_ident!("Restrict"),
                "promote_children" => format_ident!("PromoteChildren"),
                "subtree" => format_ident!("Subtree"),
                other => {
                    return Err(syn::Error::new(
                        mode.span(),
                        format!("unknown delete_mode `{other}`; expected restrict, promote_children or subtree"),
                    ))
                }
            };
            quote! { .delete_mode(::closure_table::DeleteMode::#variant) }
        }
        None => quote! {},
    };

    let id_column_variant = format_ident!("{}", to_pascal_case(&id_field_name));
    let parent_column_variant = format_ident!("{}", to_pascal_case(&parent_field_name));
    let ancestor_column_variant = format_ident!("{}", to_pascal_case(&ancestor_field_name));
    let descendant_column_variant = format_ident!("{}", to_pascal_case(&descendant_field_name));
    let depth_column_variant = format_ident!("{}", to_pascal_case(&depth_field_name));

    let entity_name_literal = syn::LitStr::new(&entity_name, struct_ident.span());
    let closure_name_literal = syn::LitStr::new(&closure_name, struct_ident.span());

    let generated = quote! {
        impl ::closure_table::TreeNode for #struct_ident {
            type Entity = Entity;
            type ActiveModel = ActiveModel;
            type Id = #id_type;

            type ClosureEntity = #closure_module_path::Entity;
            type ClosureModel = #closure_module_path::Model;
            type ClosureActiveModel = #closure_module_path::ActiveModel;

            fn closure_table_config() -> &'static ::closure_table::ClosureTableConfig {
                static CONFIG: ::closure_table::__private::Lazy<::closure_table::ClosureTableConfig> =
                    ::closure_table::__private::Lazy::new(|| {
                        let base = ::closure_table::ClosureTableConfig::new(
                            #entity_name_literal,
                            #closure_name_literal,
                        );
                        ::closure_table::ClosureTableOptions::default()
                            .parent_column(::sea_orm::sea_query::Iden::to_string(
                                &Column::#parent_column_variant,
                            ))
                            .closure_table(::sea_orm::EntityName::table_name(
                                &#closure_module_path::Entity,
                            ))
                            #delete_mode
                            .apply(base)
                    });
                &CONFIG
            }

            fn id(&self) -> Self::Id {
                self.#id_field_ident.clone()
            }

            fn parent_id(&self) -> Option<Self::Id> {
                self.#parent_field_ident.clone()
            }

            fn set_parent(active: &mut Self::ActiveModel, parent: Option<Self::Id>) {
                active.#parent_field_ident = ::sea_orm::ActiveValue::Set(parent);
            }

            fn id_to_value(id: &Self::Id) -> ::sea_orm::Value {
                ::sea_orm::Value::from(id.clone())
            }

            fn id_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#id_column_variant
            }

            fn parent_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#parent_column_variant
            }

            fn closure_ancestor_column() -> <Self::ClosureEntity as ::sea_orm::EntityTrait>::Column {
                #closure_module_path::Column::#ancestor_column_variant
            }

            fn closure_descendant_column() -> <Self::ClosureEntity as ::sea_orm::EntityTrait>::Column {
                #closure_module_path::Column::#descendant_column_variant
            }

            fn closure_depth_column() -> <Self::ClosureEntity as ::sea_orm::EntityTrait>::Column {
                #closure_module_path::Column::#depth_column_variant
            }

            fn closure_model_ancestor(model: &Self::ClosureModel) -> Self::Id {
                model.#ancestor_field_ident.clone()
            }

            fn closure_model_descendant(model: &Self::ClosureModel) -> Self::Id {
                model.#descendant_field_ident.clone()
            }

            fn closure_model_depth(model: &Self::ClosureModel) -> i32 {
                model.#depth_field_ident
            }

            fn closure_build_row(
                ancestor: Self::Id,
                descendant: Self::Id,
                depth: i32,
            ) -> Self::ClosureActiveModel {
                #[allow(clippy::needless_update)]
                {
                    #closure_module_path::ActiveModel {
                        #ancestor_field_ident: ::sea_orm::ActiveValue::Set(ancestor),
                        #descendant_field_ident: ::sea_orm::ActiveValue::Set(descendant),
                        #depth_field_ident: ::sea_orm::ActiveValue::Set(depth),
                        ..::core::default::Default::default()
                    }
                }
            }
        }
    };

    Ok(generated.into())
}

fn parse_tree_node_attr(attr: &Attribute, options: &mut Options) -> syn::Result<()> {
    attr.parse_nested_meta(|meta| {
        let ident = meta
            .path
            .get_ident()
            .ok_or_else(|| syn::Error::new(meta.path.span(), "Invalid option key"))?
            .to_string();

        if ident == "id_type" {
            let ty: Type = meta.value()?.parse()?;
            options.id_type = Some(ty);
            return Ok(());
        }

        let value: syn::LitStr = meta.value()?.parse()?;
        if ident == "delete_mode" {
            options.delete_mode = Some(value);
            return Ok(());
        }
        let slot = match ident.as_str() {
            "id_field" => &mut options.id_field,
            "parent_field" => &mut options.parent_field,
            "entity_name" => &mut options.entity_name,
            "closure_name" => &mut options.closure_name,
            "ancestor_field" => &mut options.ancestor_field,
            "descendant_field" => &mut options.descendant_field,
            "depth_field" => &mut options.depth_field,
            "closure_module" => {
                options.closure_module = Some(parse_path(&value.value(), value.span())?);
                return Ok(());
            }
            other => {
                return Err(syn::Error::new(
                    meta.path.span(),
                    format!("Unsupported tree_node option `{other}`"),
                ));
            }
        };
        *slot = Some(value.value());

        Ok(())
    })
}

fn parse_sea_orm_table_name(attr: &Attribute) -> syn::Result<Option<String>> {
    let mut table_name: Option<String> = None;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("table_name") {
            let value: syn::LitStr = meta.value()?.parse()?;
            table_name = Some(value.value());
        } else if meta.input.peek(syn::Token![=]) {
            // Skip the values of other `#[sea_orm(...)]` keys.
            let _: syn::Expr = meta.value()?.parse()?;
        }
        Ok(())
    })?;
    Ok(table_name)
}

fn parse_path(value: &str, span: proc_macro2::Span) -> syn::Result<Path> {
    syn::parse_str::<Path>(value).map_err(|_| syn::Error::new(span, "Invalid path"))
}

fn to_pascal_case(value: &str) -> String {
    value
        .split('_')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
