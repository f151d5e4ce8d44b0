//! Product catalog: the canonical document, slug derivation, write
//! normalization and the read/write service.

pub mod normalize;
pub mod product;
pub mod service;
pub mod slug;
