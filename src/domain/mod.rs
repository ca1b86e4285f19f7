pub mod annotation;
pub mod audio;
pub mod checksum;
pub mod manifest;
pub mod multitrack;
pub mod schema;
pub mod track;
