//! Report reading and writing.

pub mod generator;
pub mod reader;

pub use generator::{write_differences_csv, write_report, write_smoothed_csv};
pub use reader::read_table;
