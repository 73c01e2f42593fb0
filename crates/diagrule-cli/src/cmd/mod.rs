pub mod deps;
pub mod validate;
