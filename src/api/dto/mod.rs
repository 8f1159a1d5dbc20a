//! Data Transfer Objects for REST request/response serialization.

pub mod library_dto;
pub mod shot_dto;
pub mod stats_dto;

pub use library_dto::*;
pub use shot_dto::*;
pub use stats_dto::*;
