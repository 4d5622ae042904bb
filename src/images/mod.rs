//! Image access and preparation

pub mod catalog;
mod prepare;
mod store;

pub use catalog::{content_hash, scan_directory};
pub use prepare::{ImagePreparer, PreparedImage, JPEG_MIME};
pub use store::{
    DefaultImageStore, FsImageStore, HttpImageStore, ImageStore, ImageStoreError,
    MemoryImageStore,
};
