pub mod engine;
pub mod index;
pub mod startup;
