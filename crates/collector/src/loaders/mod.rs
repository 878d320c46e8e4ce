//! Built-in loaders.

pub mod process;

use std::sync::Arc;

use crate::task::Loader;

pub use process::{ProcessLoader, ProcessTask};

/// Loaders a scheduler starts with, in the order they are tried.
pub fn catalog() -> Vec<Arc<dyn Loader>> {
    vec![Arc::new(ProcessLoader::new())]
}
