//! "Core" refers to the objects that own the Vulkan instance and device.
//! Every other object borrows them to create its own native handles.

pub mod allocator;
pub mod command;
pub mod context;
pub mod device;
pub mod instance;
pub mod queue;
pub mod surface;
