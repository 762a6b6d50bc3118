//! Where frames end up: render passes, the framebuffers built against them and the
//! swap chain that owns the presentable images.

pub mod render_pass;
pub mod render_target;
pub mod swapchain;
