pub mod countries;
pub mod geometry;
