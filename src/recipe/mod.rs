//! Recipe interpretation: reading steps off the recipe list and mapping them
//! to ingredient keys.

pub mod mapper;
pub mod parser;
pub mod steps;
