//! File adapters built on the `image` crate.
//!
//! Formats decode whole images, so [`ImageFileSource`] decodes once and
//! serves regions from memory; [`ImageFileSink`] assembles streamed pieces
//! and encodes on `finish`.

pub mod file;

pub use file::{ImageFileSink, ImageFileSource};
