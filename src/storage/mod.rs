//! Everything that reads or writes a dataset's local storage root.

pub mod dataset;
pub mod download;
pub mod fs;
pub mod index;
pub mod metadata;
pub mod validate;
