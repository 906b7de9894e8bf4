//! tasq Proc Macros
//!
//! This crate provides the derive macro that generates per-type payload
//! serializers for tasq task queues:
//!
//! - `#[derive(TaskData)]` - Split a struct into plain bytes and reference slots
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tasq_core::TaskData;
//!
//! #[derive(TaskData)]
//! pub struct StreamChunk {
//!     frame: u64,
//!     offset: u32,
//!     target: Arc<ChunkCache>,
//!
//!     #[task_data(skip)]
//!     scratch: Vec<u8>,
//! }
//!
//! // Generated:
//! // - StreamChunk::SIZE == 12 (frame + offset)
//! // - StreamChunk::REFERENCES == 1 (target)
//! // - serialize/deserialize moving the fields in declaration order
//! ```
//!
//! # Attributes
//!
//! ## Struct Attributes
//!
//! - `#[task_data(crate = "path")]` - Optional. Path to the core crate (default: `::tasq_core`).
//!
//! ## Field Attributes
//!
//! - `#[task_data(skip)]` - Don't store the field; rebuild it with `Default::default()`.

mod parse;
mod task_data;

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

/// Derive macro for task payload serialization
///
/// Every stored field must implement `TaskData` itself. Plain fields are laid
/// out back to back in declaration order; reference fields (`Arc<T>`,
/// `Option<Arc<T>>`) each take one reference slot.
///
/// # Generated Code
///
/// - `const SIZE` - Sum of the stored fields' sizes
/// - `const REFERENCES` - Sum of the stored fields' reference counts
/// - `fn serialize(self, ...)` - Moves each stored field out of the value
/// - `fn deserialize(...)` - Rebuilds the value, defaulting skipped fields
///
/// Generic structs get a `TaskData` bound on every type parameter.
#[proc_macro_derive(TaskData, attributes(task_data))]
pub fn derive_task_data(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    task_data::derive_task_data(input).into()
}
