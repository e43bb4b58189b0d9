use super::error::{DedupError, Result};
use super::image::{Codec, load};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use image_hasher::{BitOrder, HashAlg, Hasher, HasherConfig, ImageHash};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Largest hash grid side accepted from flags or settings files.
pub const MAX_GRID_SIDE: u32 = 64;

/// Difference hash of one image.
///
/// Bits are row-major and packed MSB-first, so the hex form reads left to
/// right the same way the hash grid does.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    bits: usize,
    hash: ImageHash,
}

impl Fingerprint {
    pub fn new(hash: ImageHash, bits: usize) -> Self {
        Self { bits, hash }
    }

    #[cfg(test)]
    pub(crate) fn from_bools<I: IntoIterator<Item = bool>>(bools: I) -> Self {
        let (bits, bytes) = pack(bools);
        Self::new(ImageHash::from_bytes(&bytes).unwrap(), bits)
    }

    pub fn bit_width(&self) -> usize {
        self.bits
    }

    pub fn bit(&self, index: usize) -> bool {
        index < self.bits && self.hash.as_bytes()[index / 8] & (0x80 >> (index % 8)) != 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.hash.as_bytes()
    }

    pub fn to_hex(&self) -> String {
        self.as_bytes().iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Hamming distance. Fingerprints from one run always share a width; if
    /// they don't, every bit past the shorter width counts as differing.
    pub fn distance(&self, other: &Fingerprint) -> u32 {
        if self.bits == other.bits {
            return self.hash.dist(&other.hash);
        }
        let shared = self.bits.min(other.bits);
        let differing = (0..shared).filter(|&i| self.bit(i) != other.bit(i)).count();
        (differing + self.bits.abs_diff(other.bits)) as u32
    }

    /// Bits in `range`, packed MSB-first. Used as a bucket key.
    pub fn segment(&self, range: Range<usize>) -> Vec<u8> {
        pack(range.map(|i| self.bit(i))).1
    }
}

fn pack<I: IntoIterator<Item = bool>>(bools: I) -> (usize, Vec<u8>) {
    let mut bytes = Vec::new();
    let mut bits = 0;
    for bit in bools {
        if bits % 8 == 0 {
            bytes.push(0);
        }
        if bit {
            let last = bytes.len() - 1;
            bytes[last] |= 0x80 >> (bits % 8);
        }
        bits += 1;
    }
    (bits, bytes)
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Size of the comparison grid. The image is sampled at `(width + 1) x height`
/// and yields `width * height` bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            width: 8,
            height: 8,
        }
    }
}

impl HashConfig {
    /// Square grid holding `bits` bits; `bits` must be a perfect square.
    pub fn from_bits(bits: u32) -> Result<Self> {
        let side = (bits as f64).sqrt().round() as u32;
        if !(2..=MAX_GRID_SIDE).contains(&side) || side.checked_mul(side) != Some(bits) {
            return Err(DedupError::config(format!(
                "hash bits must be a perfect square between 4 and {}, got {}",
                MAX_GRID_SIDE * MAX_GRID_SIDE,
                bits
            )));
        }
        Ok(Self {
            width: side,
            height: side,
        })
    }

    pub fn bit_width(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn validate(&self) -> Result<()> {
        let sides = 1..=MAX_GRID_SIDE;
        if !sides.contains(&self.width) || !sides.contains(&self.height) {
            return Err(DedupError::config(format!(
                "hash grid sides must lie in 1..={}, got {}x{}",
                MAX_GRID_SIDE, self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Fingerprint of one image file plus the facts used later to pick a
/// canonical copy.
#[derive(Debug, Clone, Serialize)]
pub struct ImageFingerprint {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub dimensions: (u32, u32),
    pub file_size: u64,
    #[serde(skip)]
    pub digest: blake3::Hash,
}

impl ImageFingerprint {
    pub fn pixel_count(&self) -> u64 {
        self.dimensions.0 as u64 * self.dimensions.1 as u64
    }
}

/// Difference-hash engine: gradient hash over a `(width + 1) x height`
/// Catmull-Rom downscale, one bit per `pixel[x] < pixel[x + 1]`.
pub struct HashEngine {
    config: HashConfig,
    hasher: Hasher,
}

impl Default for HashEngine {
    fn default() -> Self {
        Self::build(HashConfig::default())
    }
}

impl HashEngine {
    pub fn new(config: HashConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: HashConfig) -> Self {
        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Gradient)
            .hash_size(config.width, config.height)
            .resize_filter(FilterType::CatmullRom)
            .bit_order(BitOrder::MsbFirst)
            .to_hasher();
        Self { config, hasher }
    }

    /// dHash of an in-memory image, or `None` for a zero-sized one.
    pub fn hash_image(&self, image: &DynamicImage) -> Option<Fingerprint> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return None;
        }
        let hash = self.hasher.hash_image(image);
        Some(Fingerprint::new(hash, self.config.bit_width()))
    }

    /// Read, decode and fingerprint one file.
    pub fn hash_file(&self, codec: &dyn Codec, path: &Path) -> Result<ImageFingerprint> {
        let loaded = load(codec, path)?;
        let fingerprint = self
            .hash_image(&loaded.image)
            .ok_or_else(|| DedupError::decode(path, "image has zero width or height"))?;

        Ok(ImageFingerprint {
            path: path.to_path_buf(),
            fingerprint,
            dimensions: loaded.dimensions(),
            file_size: loaded.file_size,
            digest: loaded.digest,
        })
    }
}
