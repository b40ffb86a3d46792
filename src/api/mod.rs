pub mod countries;
pub mod errors;
pub mod filters;
pub mod render;
pub mod stats;
