pub mod lodging;
pub mod nights;
