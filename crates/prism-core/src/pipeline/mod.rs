//! Image-side building blocks used by the stages.
//!
//! - **decode**: Format detection, structural inspection, full decode
//! - **validate**: Magic-byte checks before decoding
//! - **hash**: Content hashes for content-keyed deduplication
//! - **discovery**: Non-recursive file listing for the scanner

pub mod decode;
pub mod discovery;
pub mod hash;
pub mod validate;

pub use decode::{encode_image, format_extension, DecodedImage, ImageDecoder};
pub use discovery::FileDiscovery;
pub use hash::Hasher;
pub use validate::Validator;
