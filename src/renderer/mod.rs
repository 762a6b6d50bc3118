pub mod config;
pub mod core;
pub mod descriptor;
pub mod frame;
pub mod pipeline;
pub mod cache;
pub mod resources;
pub mod scene;
pub mod target;
