pub mod attendance;
pub mod errors;
pub mod faces;
