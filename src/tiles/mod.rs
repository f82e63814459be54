pub mod failed;
pub mod fetch;
pub mod matrix;
pub mod prefetch;
pub mod provider;
pub mod types;
