//! Decode cache subsystem.
//!
//! Decoded frames are large, so only a handful are kept: the one on screen
//! and its neighbour. Anything pushed out is released immediately instead of
//! waiting for the last reader to go away.
//!
//! Re-exports:
//! - [`DecodeCache`]: bounded LRU of decoded frames with a release hook.
//! - [`ImageDecoder`], [`RasterDecoder`], [`DecodedImage`]: the codec seam.
//! - [`CacheStats`]: counters.

pub mod cache;
pub mod decoder;
pub mod types;

pub use cache::{DecodeCache, ReleaseHook, DEFAULT_CAPACITY};
pub use decoder::{DecodedImage, ImageDecoder, RasterDecoder};
pub use types::CacheStats;
