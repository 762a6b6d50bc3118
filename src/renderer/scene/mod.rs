//! What gets drawn: geometry, placed objects with per-image uniforms and the node tree
//! that orders them.

pub mod drawable;
pub mod library;
pub mod mesh;
pub mod node;
