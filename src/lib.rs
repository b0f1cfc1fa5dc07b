//! Thumbnail and preview cache for a photo browser: derives a content key
//! per request, serves from a bounded memory LRU or an on-disk JPEG cache,
//! and otherwise decodes through an ordered set of backends, falling back to
//! a neutral placeholder.

pub mod cache;
pub mod config;
pub mod decode;
pub mod errors;
pub mod placeholder;
pub mod raster;
pub mod service;

pub use cache::CacheKey;
pub use config::ServiceConfig;
pub use decode::{DecodePipeline, SourceDecoder};
pub use raster::{DecodedImage, ImageOrigin, PixelFormat, RequestedSide};
pub use service::{DecodeRequest, ImageService, RequestPurpose};
