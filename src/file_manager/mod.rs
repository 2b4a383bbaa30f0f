// File helpers
pub mod json_ops;

pub use json_ops::{publish_file_copy, read_json_file, update_json_file, write_json_file};
