pub mod location;
pub mod samples;
pub mod tracking;
