use super::error::{DedupError, Result};
use image::{DynamicImage, GenericImageView};
use std::fs;
use std::path::Path;

pub type CodecError = Box<dyn std::error::Error + Send + Sync>;

/// Turns encoded image bytes into a pixel grid.
///
/// The rest of the crate only sees `DynamicImage`; which formats are
/// understood is up to the implementation.
pub trait Codec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> std::result::Result<DynamicImage, CodecError>;
}

/// Codec backed by the `image` crate's format sniffing.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCodec;

impl Codec for ImageCodec {
    fn decode(&self, bytes: &[u8]) -> std::result::Result<DynamicImage, CodecError> {
        Ok(image::load_from_memory(bytes)?)
    }
}

/// A decoded image together with facts about the file it came from.
pub struct LoadedImage {
    pub image: DynamicImage,
    pub file_size: u64,
    pub digest: blake3::Hash,
}

impl LoadedImage {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Read and decode `path`.
///
/// Read failures surface as `FileSystem`, anything the codec rejects (or an
/// empty / zero-sized image) as `Decode`.
pub fn load(codec: &dyn Codec, path: &Path) -> Result<LoadedImage> {
    let bytes = fs::read(path).map_err(|e| DedupError::fs(path, e))?;
    if bytes.is_empty() {
        return Err(DedupError::decode(path, "file is empty"));
    }

    let image = codec
        .decode(&bytes)
        .map_err(|e| DedupError::decode(path, e))?;
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(DedupError::decode(path, "image has zero width or height"));
    }

    Ok(LoadedImage {
        image,
        file_size: bytes.len() as u64,
        digest: blake3::hash(&bytes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    #[test]
    fn test_load_png() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pic.png");
        let img = ImageBuffer::from_fn(12, 7, |x, y| Rgb([(x * 20) as u8, (y * 30) as u8, 0]));
        img.save(&path).unwrap();

        let loaded = load(&ImageCodec, &path).unwrap();
        assert_eq!(loaded.dimensions(), (12, 7));
        assert_eq!(loaded.file_size, fs::metadata(&path).unwrap().len());
        assert_eq!(loaded.digest, blake3::hash(&fs::read(&path).unwrap()));
    }

    #[test]
    fn test_missing_file_is_filesystem_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = load(&ImageCodec, &temp_dir.path().join("nope.png"));
        assert!(matches!(result, Err(DedupError::FileSystem { .. })));
    }

    #[test]
    fn test_garbage_and_empty_are_decode_errors() {
        let temp_dir = TempDir::new().unwrap();
        let garbage = temp_dir.path().join("garbage.jpg");
        let empty = temp_dir.path().join("empty.png");
        fs::write(&garbage, b"definitely not a jpeg").unwrap();
        fs::write(&empty, b"").unwrap();

        assert!(matches!(
            load(&ImageCodec, &garbage),
            Err(DedupError::Decode { .. })
        ));
        assert!(matches!(
            load(&ImageCodec, &empty),
            Err(DedupError::Decode { .. })
        ));
    }
}
