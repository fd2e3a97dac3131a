pub mod cache;
pub mod resource;
