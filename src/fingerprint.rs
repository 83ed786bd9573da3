//! Perceptual fingerprints of logo images.
//!
//! Every image is reduced to four 64-bit hashes: average (aHash), difference
//! (dHash), perceptual (DCT based pHash) and wavelet (Haar wHash). How those
//! hashes are compared is decided once per run by a [`DistancePolicy`].

use std::{fmt, str::FromStr};

use image::{imageops, imageops::FilterType, DynamicImage, GrayImage, Luma};
use serde::Serialize;

use crate::types::DecodeError;

pub const HASH_BITS: u32 = 64;
pub const DEFAULT_NORMALIZE_SIZE: u32 = 64;
pub const DEFAULT_MIN_IMAGE_SIZE: u32 = 16;

const HASH_SIDE: u32 = 8;
const DCT_SIDE: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    Average,
    Difference,
    Perceptual,
    Wavelet,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 4] = [
        HashAlgorithm::Average,
        HashAlgorithm::Difference,
        HashAlgorithm::Perceptual,
        HashAlgorithm::Wavelet,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            HashAlgorithm::Average => "ahash",
            HashAlgorithm::Difference => "dhash",
            HashAlgorithm::Perceptual => "phash",
            HashAlgorithm::Wavelet => "whash",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ImageHashes {
    pub average: u64,
    pub difference: u64,
    pub perceptual: u64,
    pub wavelet: u64,
}

impl ImageHashes {
    pub fn get(&self, algorithm: HashAlgorithm) -> u64 {
        match algorithm {
            HashAlgorithm::Average => self.average,
            HashAlgorithm::Difference => self.difference,
            HashAlgorithm::Perceptual => self.perceptual,
            HashAlgorithm::Wavelet => self.wavelet,
        }
    }

    pub fn hex(&self, algorithm: HashAlgorithm) -> String {
        format!("{:016x}", self.get(algorithm))
    }
}

pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// The single rule turning four per-algorithm Hamming distances into one.
///
/// Every variant is a metric, so the threshold graph built from it behaves
/// the same way regardless of the policy picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistancePolicy {
    /// Distance of one algorithm only.
    Single(HashAlgorithm),
    /// Sum of all four distances, from 0 to 256.
    Sum,
    /// Largest of the four distances: within a threshold only when every
    /// algorithm is.
    Max,
}

impl Default for DistancePolicy {
    fn default() -> Self {
        DistancePolicy::Single(HashAlgorithm::Perceptual)
    }
}

impl DistancePolicy {
    pub fn distance(&self, a: &ImageHashes, b: &ImageHashes) -> u32 {
        let per = |alg: HashAlgorithm| hamming(a.get(alg), b.get(alg));
        match self {
            DistancePolicy::Single(alg) => per(*alg),
            DistancePolicy::Sum => HashAlgorithm::ALL.iter().map(|alg| per(*alg)).sum(),
            DistancePolicy::Max => HashAlgorithm::ALL
                .iter()
                .map(|alg| per(*alg))
                .max()
                .unwrap_or(0),
        }
    }

    pub fn max_distance(&self) -> u32 {
        match self {
            DistancePolicy::Sum => HASH_BITS * HashAlgorithm::ALL.len() as u32,
            _ => HASH_BITS,
        }
    }
}

impl fmt::Display for DistancePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistancePolicy::Single(alg) => write!(f, "{}", alg.label()),
            DistancePolicy::Sum => write!(f, "sum"),
            DistancePolicy::Max => write!(f, "max"),
        }
    }
}

impl FromStr for DistancePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "phash" => Ok(DistancePolicy::Single(HashAlgorithm::Perceptual)),
            "dhash" => Ok(DistancePolicy::Single(HashAlgorithm::Difference)),
            "ahash" => Ok(DistancePolicy::Single(HashAlgorithm::Average)),
            "whash" => Ok(DistancePolicy::Single(HashAlgorithm::Wavelet)),
            "sum" => Ok(DistancePolicy::Sum),
            "max" => Ok(DistancePolicy::Max),
            other => Err(format!(
                "unknown distance policy {} (expected phash, dhash, ahash, whash, sum or max)",
                other
            )),
        }
    }
}

/// Fingerprint of one domain's logo; the unit the clustering engine works on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fingerprint {
    pub domain: String,
    pub logo_url: String,
    pub hashes: ImageHashes,
    pub width: u32,
    pub height: u32,
    pub format: Option<String>,
}

/// What a [`Fingerprinter`] extracts from raw image bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDigest {
    pub hashes: ImageHashes,
    pub width: u32,
    pub height: u32,
    pub format: Option<String>,
}

impl ImageDigest {
    pub fn into_fingerprint(self, domain: &str, logo_url: &str) -> Fingerprint {
        Fingerprint {
            domain: domain.into(),
            logo_url: logo_url.into(),
            hashes: self.hashes,
            width: self.width,
            height: self.height,
            format: self.format,
        }
    }
}

/// Pure, deterministic `image bytes -> hashes` capability. Runs on the
/// blocking pool, hence `Send + Sync`.
pub trait Fingerprinter: Send + Sync {
    fn digest(&self, bytes: &[u8]) -> Result<ImageDigest, DecodeError>;
}

#[derive(Debug, Clone, Copy)]
pub struct PerceptualHasher {
    normalize_size: u32,
    min_image_size: u32,
}

impl Default for PerceptualHasher {
    fn default() -> Self {
        PerceptualHasher::new(DEFAULT_NORMALIZE_SIZE, DEFAULT_MIN_IMAGE_SIZE)
    }
}

impl PerceptualHasher {
    pub fn new(normalize_size: u32, min_image_size: u32) -> Self {
        PerceptualHasher {
            normalize_size: normalize_size.max(HASH_SIDE + 1),
            min_image_size,
        }
    }

    pub fn hash_image(&self, img: &DynamicImage) -> ImageHashes {
        let gray = normalize(img, self.normalize_size);
        ImageHashes {
            average: average_hash(&gray),
            difference: difference_hash(&gray),
            perceptual: perceptual_hash(&gray),
            wavelet: wavelet_hash(&gray),
        }
    }
}

impl Fingerprinter for PerceptualHasher {
    fn digest(&self, bytes: &[u8]) -> Result<ImageDigest, DecodeError> {
        let format = image::guess_format(bytes).map_err(|_| DecodeError::Unsupported)?;
        let img = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;
        let (width, height) = (img.width(), img.height());
        if width < self.min_image_size || height < self.min_image_size {
            return Err(DecodeError::TooSmall { width, height });
        }
        Ok(ImageDigest {
            hashes: self.hash_image(&img),
            width,
            height,
            format: Some(format!("{:?}", format).to_lowercase()),
        })
    }
}

/// Square grayscale thumbnail; transparent pixels are flattened onto white,
/// which is how logos are usually displayed.
fn normalize(img: &DynamicImage, size: u32) -> GrayImage {
    let rgba = img
        .resize_exact(size, size, FilterType::Lanczos3)
        .to_rgba8();
    GrayImage::from_fn(size, size, |x, y| {
        let p = rgba.get_pixel(x, y).0;
        let alpha = p[3] as f32 / 255.0;
        let luma = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
        let v = luma * alpha + 255.0 * (1.0 - alpha);
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

fn pixels(gray: &GrayImage, width: u32, height: u32) -> Vec<f32> {
    imageops::resize(gray, width, height, FilterType::Lanczos3)
        .pixels()
        .map(|p| p.0[0] as f32)
        .collect()
}

fn to_bits(bits: impl Iterator<Item = bool>) -> u64 {
    bits.fold(0u64, |acc, b| (acc << 1) | b as u64)
}

fn median(values: &[f32]) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.is_empty() {
        0.0
    } else if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

pub fn average_hash(gray: &GrayImage) -> u64 {
    let px = pixels(gray, HASH_SIDE, HASH_SIDE);
    let mean = px.iter().sum::<f32>() / px.len() as f32;
    to_bits(px.iter().map(|v| *v > mean))
}

pub fn difference_hash(gray: &GrayImage) -> u64 {
    let w = HASH_SIDE + 1;
    let px = pixels(gray, w, HASH_SIDE);
    let side = HASH_SIDE as usize;
    let w = w as usize;
    to_bits((0..side).flat_map(|y| {
        let row = &px[y * w..(y + 1) * w];
        (0..side).map(move |x| row[x + 1] > row[x])
    }))
}

pub fn perceptual_hash(gray: &GrayImage) -> u64 {
    let n = DCT_SIDE as usize;
    let px = pixels(gray, DCT_SIDE, DCT_SIDE);
    let rows: Vec<Vec<f32>> = px.chunks(n).map(dct_1d).collect();
    let mut coeffs = vec![vec![0f32; n]; n];
    for x in 0..n {
        let column: Vec<f32> = rows.iter().map(|r| r[x]).collect();
        for (y, v) in dct_1d(&column).into_iter().enumerate() {
            coeffs[y][x] = v;
        }
    }
    let side = HASH_SIDE as usize;
    let low: Vec<f32> = (0..side)
        .flat_map(|y| coeffs[y][..side].to_vec())
        .collect();
    let med = median(&low);
    to_bits(low.iter().map(|v| *v > med))
}

/// Unnormalised DCT-II; only the relative order of coefficients matters here.
fn dct_1d(input: &[f32]) -> Vec<f32> {
    let n = input.len();
    (0..n)
        .map(|k| {
            input
                .iter()
                .enumerate()
                .map(|(i, x)| {
                    x * (std::f32::consts::PI / n as f32 * (i as f32 + 0.5) * k as f32).cos()
                })
                .sum()
        })
        .collect()
}

/// Haar approximation band: the image is averaged over 2x2 blocks until it is
/// 8x8, then thresholded at its median.
pub fn wavelet_hash(gray: &GrayImage) -> u64 {
    let mut side = DEFAULT_NORMALIZE_SIZE as usize;
    let mut band = pixels(gray, side as u32, side as u32);
    while side > HASH_SIDE as usize {
        let half = side / 2;
        let mut next = vec![0f32; half * half];
        for y in 0..half {
            for x in 0..half {
                let at = |dx: usize, dy: usize| band[(2 * y + dy) * side + 2 * x + dx];
                next[y * half + x] = (at(0, 0) + at(1, 0) + at(0, 1) + at(1, 1)) / 4.0;
            }
        }
        band = next;
        side = half;
    }
    let med = median(&band);
    to_bits(band.iter().map(|v| *v > med))
}
