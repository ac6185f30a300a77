pub mod cleanup;
pub mod wait;
