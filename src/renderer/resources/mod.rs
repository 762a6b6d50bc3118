//! "Resources" are the GPU objects created from a context: memory-backed buffers and images,
//! views and samplers over them, and shader programs. Each owns its native handle.

pub mod buffer;
pub mod image;
pub mod image_view;
pub mod sampler;
pub mod shader;
pub mod texture;
pub mod vertex;
