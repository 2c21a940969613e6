//! Thumbnail generation.
//!
//! Generators are tried in a fixed priority order. Each is gated by
//! runtime settings (`thumb_{name}_enabled`, `thumb_{name}_exts`,
//! `thumb_{name}_max_size`, `thumb_{name}_path`), and a failing generator
//! hands over to the next eligible one.

pub mod generator;
pub mod pipeline;

pub use generator::{
    BuiltinGenerator, FfmpegGenerator, GenerateRequest, Generator, GeneratorDefaults,
    LibRawGenerator, MusicCoverGenerator, VipsGenerator,
};
pub use pipeline::{GeneratedThumbnail, ThumbnailPipeline};
