//! Turns image references into payloads for multimodal requests
//!
//! Bytes come from the `ImageStore`; decoding, ROI cropping, downscaling and
//! JPEG re-encoding run on the blocking pool.

use super::store::{ImageStore, ImageStoreError};
use crate::inference::ImageInput;
use base64::{engine::general_purpose, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::sync::Arc;

pub const JPEG_MIME: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImage {
    pub mime: &'static str,
    pub base64: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone)]
pub struct ImagePreparer {
    store: Arc<dyn ImageStore>,
    max_px: u32,
    jpeg_quality: u8,
}

impl ImagePreparer {
    pub fn new(store: Arc<dyn ImageStore>, max_px: u32, jpeg_quality: u8) -> Self {
        Self {
            store,
            max_px: max_px.max(64),
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub fn store(&self) -> &Arc<dyn ImageStore> {
        &self.store
    }

    pub async fn prepare(&self, input: &ImageInput) -> Result<PreparedImage, ImageStoreError> {
        let data = self.store.fetch(&input.image).await?;
        let id = input.image.id.clone();
        let region = input.region;
        let max_px = self.max_px;
        let quality = self.jpeg_quality;

        tokio::task::spawn_blocking(move || {
            let img = image::load_from_memory(&data).map_err(|e| ImageStoreError::Decode {
                id: id.clone(),
                message: e.to_string(),
            })?;
            let img = match region {
                Some(roi) => {
                    let (x, y, w, h) = roi.to_pixels(img.width(), img.height());
                    img.crop_imm(x, y, w, h)
                }
                None => img,
            };
            encode_jpeg(img, max_px, quality).map_err(|message| ImageStoreError::Decode {
                id,
                message,
            })
        })
        .await
        .map_err(|e| ImageStoreError::Decode {
            id: input.image.id.clone(),
            message: format!("image worker failed: {}", e),
        })?
    }
}

fn encode_jpeg(img: DynamicImage, max_px: u32, quality: u8) -> Result<PreparedImage, String> {
    let img = if img.width() > max_px || img.height() > max_px {
        img.thumbnail(max_px, max_px)
    } else {
        img
    };
    let rgb = img.to_rgb8();

    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(&rgb)
        .map_err(|e| e.to_string())?;

    Ok(PreparedImage {
        mime: JPEG_MIME,
        base64: general_purpose::STANDARD.encode(&buf),
        width: rgb.width(),
        height: rgb.height(),
    })
}

impl std::fmt::Debug for ImagePreparer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePreparer")
            .field("max_px", &self.max_px)
            .field("jpeg_quality", &self.jpeg_quality)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ImageRef, RegionOfInterest};
    use crate::images::MemoryImageStore;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 255) as u8, (y % 255) as u8, 128])
        });
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn preparer(max_px: u32) -> (Arc<MemoryImageStore>, ImagePreparer) {
        let store = Arc::new(MemoryImageStore::new());
        let preparer = ImagePreparer::new(store.clone(), max_px, 80);
        (store, preparer)
    }

    #[tokio::test]
    async fn test_downscales_large_images() {
        let (store, preparer) = preparer(100);
        store.insert("big", png_bytes(400, 200));

        let prepared = preparer
            .prepare(&ImageInput::full(ImageRef::new("big", "mem://big", "h")))
            .await
            .unwrap();

        assert_eq!(prepared.mime, "image/jpeg");
        assert_eq!(prepared.width, 100);
        assert_eq!(prepared.height, 50);
        let decoded = general_purpose::STANDARD.decode(&prepared.base64).unwrap();
        assert_eq!(&decoded[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_crops_region() {
        let (store, preparer) = preparer(1600);
        store.insert("car", png_bytes(200, 100));

        let input = ImageInput::cropped(
            ImageRef::new("car", "mem://car", "h"),
            RegionOfInterest::new(0.5, 0.0, 0.5, 0.5),
        );
        let prepared = preparer.prepare(&input).await.unwrap();
        assert_eq!((prepared.width, prepared.height), (100, 50));
    }

    #[tokio::test]
    async fn test_undecodable_bytes() {
        let (store, preparer) = preparer(1600);
        store.insert("junk", b"not an image".to_vec());

        let result = preparer
            .prepare(&ImageInput::full(ImageRef::new("junk", "mem://junk", "h")))
            .await;
        assert!(matches!(result, Err(ImageStoreError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_missing_image() {
        let (_store, preparer) = preparer(1600);
        let result = preparer
            .prepare(&ImageInput::full(ImageRef::new("gone", "mem://gone", "h")))
            .await;
        assert!(matches!(result, Err(ImageStoreError::NotFound(_))));
    }
}
