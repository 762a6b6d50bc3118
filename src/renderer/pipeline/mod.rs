pub mod builder;
pub mod library;
pub mod material;
pub mod registry;
