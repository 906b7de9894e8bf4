//! Attribute parsing for the TaskData derive macro

use darling::{FromDeriveInput, FromField};
use syn::{DeriveInput, Generics, Ident, Path, Type};

/// Parsed #[task_data(...)] attributes on the struct
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(task_data), supports(struct_any))]
pub struct TaskDataArgs {
    /// Struct identifier
    pub ident: Ident,

    /// Struct generics
    pub generics: Generics,

    /// Struct fields
    pub data: darling::ast::Data<(), TaskDataFieldArgs>,

    /// Path to the tasq core crate (defaults to `::tasq_core`)
    #[darling(rename = "crate", default)]
    pub krate: Option<Path>,
}

impl TaskDataArgs {
    /// Path used to refer to the core crate in generated code
    pub fn crate_path(&self) -> Path {
        self.krate
            .clone()
            .unwrap_or_else(|| syn::parse_quote!(::tasq_core))
    }
}

/// Parsed #[task_data(...)] attributes on a field
#[derive(Debug, FromField)]
#[darling(attributes(task_data))]
pub struct TaskDataFieldArgs {
    /// Field identifier (`None` for tuple struct fields)
    pub ident: Option<Ident>,

    /// Field type
    pub ty: Type,

    /// Field is not stored; it is rebuilt with `Default::default()`
    #[darling(default)]
    pub skip: bool,
}

/// Parse a DeriveInput into TaskDataArgs
pub fn parse_task_data(input: &DeriveInput) -> darling::Result<TaskDataArgs> {
    TaskDataArgs::from_derive_input(input)
}
