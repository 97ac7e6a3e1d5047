pub mod sync;
pub mod wait;
