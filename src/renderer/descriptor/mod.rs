pub mod layout;
pub mod pool;
pub mod set_buffer;
pub mod updater;
