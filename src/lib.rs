//! Resource wrappers and a frame presentation engine on top of Vulkan.

pub mod renderer;
