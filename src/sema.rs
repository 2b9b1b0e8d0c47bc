//! Semantic analysis: the frozen symbol registry, expression typing,
//! validation rules and the definite-initialization walk.

pub mod consts;
pub mod init;
pub mod registry;
pub mod resolve;
pub mod validate;
