// Embedding-bag lookup kernels with runtime SIMD dispatch
pub mod error;
pub mod lookup;

pub use error::LookupError;
pub use lookup::{embedding_lookup, Element, ElementKind, KernelTier, Lookup, RowIndex};
pub use lookup::{
    embedding_lookup_i32_f16_f32, embedding_lookup_i32_f32_f32, embedding_lookup_i32_u8_f32,
    embedding_lookup_i64_f16_f32, embedding_lookup_i64_f32_f32, embedding_lookup_i64_u8_f32,
};
