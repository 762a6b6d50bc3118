//! Frame pacing: synchronization objects per frame in flight, the acquire/record/submit/present
//! state machine and the window renderer that drives it against a real swap chain.

pub mod pacer;
pub mod renderer;
pub mod sync;
