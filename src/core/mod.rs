pub mod config;
pub mod geo;
pub mod map;
pub mod projection;
pub mod viewport;
