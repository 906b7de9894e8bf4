//! TaskData derive macro implementation

use darling::ast::Style;
use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::ext::IdentExt;
use syn::{DeriveInput, Ident, Type};

use crate::parse::{parse_task_data, TaskDataArgs, TaskDataFieldArgs};

/// A field as seen by the generated code
struct FieldPlan<'a> {
    /// Binding used when destructuring and rebuilding the struct
    binding: Ident,
    /// Member name (`name` or tuple index)
    member: TokenStream,
    ty: &'a Type,
    skip: bool,
}

/// Generate the TaskData implementation
pub fn derive_task_data(input: DeriveInput) -> TokenStream {
    match parse_task_data(&input) {
        Ok(args) => generate_impl(args),
        Err(e) => e.write_errors(),
    }
}

fn generate_impl(args: TaskDataArgs) -> TokenStream {
    let krate = args.crate_path();
    let struct_name = &args.ident;

    let fields = match &args.data {
        darling::ast::Data::Struct(fields) => fields,
        _ => {
            return syn::Error::new_spanned(
                &args.ident,
                "TaskData can only be derived for structs",
            )
            .to_compile_error()
        }
    };

    let plans = plan_fields(&fields.fields);
    let stored: Vec<_> = plans.iter().filter(|p| !p.skip).collect();

    // Every type parameter must itself be serializable
    let mut generics = args.generics.clone();
    let type_params: Vec<_> = generics.type_params().map(|p| p.ident.clone()).collect();
    {
        let where_clause = generics.make_where_clause();
        for param in &type_params {
            where_clause
                .predicates
                .push(syn::parse_quote!(#param: #krate::TaskData));
        }
    }
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let stored_tys: Vec<_> = stored.iter().map(|p| p.ty).collect();
    let pattern = destructure_pattern(fields.style, &plans);
    let construct = construct_expr(fields.style, &plans);

    let writes = stored.iter().map(|p| {
        let binding = &p.binding;
        let ty = p.ty;
        quote! {
            #krate::TaskData::serialize(
                #binding,
                &mut bytes[offset..offset + <#ty as #krate::TaskData>::SIZE],
                refs,
            );
            offset += <#ty as #krate::TaskData>::SIZE;
        }
    });

    let reads = plans.iter().map(|p| {
        let binding = &p.binding;
        let ty = p.ty;
        if p.skip {
            quote! {
                let #binding: #ty = ::std::default::Default::default();
            }
        } else {
            quote! {
                let #binding = <#ty as #krate::TaskData>::deserialize(
                    &bytes[offset..offset + <#ty as #krate::TaskData>::SIZE],
                    refs,
                )?;
                offset += <#ty as #krate::TaskData>::SIZE;
            }
        }
    });

    quote! {
        impl #impl_generics #krate::TaskData for #struct_name #ty_generics #where_clause {
            const SIZE: usize = 0 #(+ <#stored_tys as #krate::TaskData>::SIZE)*;
            const REFERENCES: usize = 0 #(+ <#stored_tys as #krate::TaskData>::REFERENCES)*;

            #[allow(unused_assignments, unused_variables, unused_mut)]
            fn serialize(self, bytes: &mut [u8], refs: &mut #krate::RefWriter<'_>) {
                let #pattern = self;
                let mut offset = 0usize;
                #(#writes)*
            }

            #[allow(unused_assignments, unused_variables, unused_mut)]
            fn deserialize(
                bytes: &[u8],
                refs: &mut #krate::RefReader<'_>,
            ) -> ::std::result::Result<Self, #krate::DataError> {
                let bytes = #krate::data::payload_bytes(
                    bytes,
                    <Self as #krate::TaskData>::SIZE,
                )?;
                let mut offset = 0usize;
                #(#reads)*
                ::std::result::Result::Ok(#construct)
            }
        }
    }
}

fn plan_fields(fields: &[TaskDataFieldArgs]) -> Vec<FieldPlan<'_>> {
    fields
        .iter()
        .enumerate()
        .map(|(index, field)| match &field.ident {
            Some(ident) => FieldPlan {
                binding: format_ident!("__field_{}", ident.unraw()),
                member: quote!(#ident),
                ty: &field.ty,
                skip: field.skip,
            },
            None => {
                let index = syn::Index::from(index);
                FieldPlan {
                    binding: format_ident!("__field_{}", index.index),
                    member: quote!(#index),
                    ty: &field.ty,
                    skip: field.skip,
                }
            }
        })
        .collect()
}

/// `Self { a: __field_a, b: _ }`, `Self(__field_0, _)` or `Self`
fn destructure_pattern(style: Style, plans: &[FieldPlan<'_>]) -> TokenStream {
    let bindings = plans.iter().map(|p| {
        if p.skip {
            quote!(_)
        } else {
            let binding = &p.binding;
            quote!(#binding)
        }
    });

    match style {
        Style::Struct => {
            let members = plans.iter().map(|p| &p.member);
            quote!(Self { #(#members: #bindings),* })
        }
        Style::Tuple => quote!(Self(#(#bindings),*)),
        Style::Unit => quote!(Self),
    }
}

/// `Self { a: __field_a, b: __field_b }`, `Self(__field_0, __field_1)` or `Self`
fn construct_expr(style: Style, plans: &[FieldPlan<'_>]) -> TokenStream {
    let bindings = plans.iter().map(|p| &p.binding);

    match style {
        Style::Struct => {
            let members = plans.iter().map(|p| &p.member);
            quote!(Self { #(#members: #bindings),* })
        }
        Style::Tuple => quote!(Self(#(#bindings),*)),
        Style::Unit => quote!(Self),
    }
}
