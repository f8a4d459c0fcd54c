//! Utility functions

pub mod fs;
pub mod hash;
pub mod path;

pub use fs::{write_atomic, write_json_atomic};
pub use hash::{hash_bytes, hash_text};
pub use path::{normalize_path, relative_path};
