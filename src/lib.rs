pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod storage;

pub use domain::manifest::{FileRef, Manifest};
pub use error::DatasetError;
pub use storage::{
    dataset::Dataset,
    validate::{ValidationReport, validate},
};
