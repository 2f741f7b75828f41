//! # wharf-image
//!
//! Image ingestion for Wharf.
//!
//! An import downloads a saved image archive from the image service, sniffs
//! and decompresses it, renames its repository to the requested id while
//! copying it entry by entry, and streams the result into the runtime's load
//! call. The rewrite runs on a blocking thread and talks to the load through
//! a bounded pipe, so no archive is ever held in memory whole.

#![warn(missing_docs)]

pub mod manager;
pub mod pipe;
pub mod repositories;
pub mod rewrite;
pub mod sniff;
pub mod source;

pub use manager::ImageManager;
pub use source::{HttpImageSource, ImageServiceConfig, ImageSource};
