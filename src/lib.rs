pub mod aggregate;
pub mod db;
pub mod error;
pub mod fetch;
pub mod grid;
pub mod locate;
pub mod meta;
pub mod parse;
pub mod update;
