pub mod builder;
pub mod scorer;
pub mod traits;
