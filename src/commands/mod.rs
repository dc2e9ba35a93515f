pub mod builder;
pub mod cancellation;
pub mod instantiation;
pub mod instruction;
pub mod modification;
