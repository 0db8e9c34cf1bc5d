pub mod artifact;
pub mod time;
