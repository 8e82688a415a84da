use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

/// RGBA working image shared by every transform.
pub type PixelBuffer = RgbaImage;

/// No transform produces an image larger than this on either side.
pub const MAX_DIMENSION: u32 = 4000;

/// Target short side for the binarizing and grayscale recipes.
pub const DEFAULT_TARGET: u32 = 3000;

/// Target short side for the contrast-only recipe.
pub const CONTRAST_TARGET: u32 = 2500;

/// Target short side for the minimal recipe.
pub const MINIMAL_TARGET: u32 = 2000;

/// Short-side targets for the upscaling step of each recipe family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpscaleTargets {
    /// Binarizing, grayscale and tone-curve recipes
    pub standard: u32,
    /// Contrast-only recipe
    pub contrast: u32,
    /// Minimal recipe
    pub minimal: u32,
}

impl Default for UpscaleTargets {
    fn default() -> Self {
        Self {
            standard: DEFAULT_TARGET,
            contrast: CONTRAST_TARGET,
            minimal: MINIMAL_TARGET,
        }
    }
}

/// Above this pixel count the morphological open is skipped.
pub const MORPHOLOGY_PIXEL_LIMIT: u64 = 2_000_000;

/// Pixels darker than this count toward the "dark text" classification.
const DARK_CUTOFF: u8 = 100;

/// Pixels brighter than this count toward the "bright display" classification.
const BRIGHT_CUTOFF: u8 = 150;

/// Binarization aggressiveness for the three baseline recipes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinarizeMode {
    Aggressive,
    Standard,
    Conservative,
}

impl BinarizeMode {
    /// Fraction of the intensity range used for the adaptive threshold.
    fn range_fraction(self) -> f32 {
        match self {
            BinarizeMode::Aggressive => 0.2,
            BinarizeMode::Standard => 0.35,
            BinarizeMode::Conservative => 0.5,
        }
    }

    /// Contrast multiplier, grown by the pixel's distance from the median.
    fn enhance_factor(self, local_contrast: f32) -> f32 {
        match self {
            BinarizeMode::Aggressive => 6.0 + local_contrast * 2.0,
            BinarizeMode::Standard => 5.0 + local_contrast * 1.5,
            BinarizeMode::Conservative => 4.0 + local_contrast,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BinarizeMode::Aggressive => "aggressive",
            BinarizeMode::Standard => "standard",
            BinarizeMode::Conservative => "conservative",
        }
    }
}

/// What the binarizer thinks the display looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayClass {
    /// Dark digits on a light background
    DarkText,
    /// Lit segments on a dark background
    BrightDisplay,
    Neutral,
}

fn luma(pixel: &Rgba<u8>) -> f32 {
    pixel[0] as f32 * 0.299 + pixel[1] as f32 * 0.587 + pixel[2] as f32 * 0.114
}

fn to_channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

fn gray_pixel(value: u8, alpha: u8) -> Rgba<u8> {
    Rgba([value, value, value, alpha])
}

/// Maps every pixel through `f(gray)` and writes the result into R, G and B.
fn map_gray(img: &PixelBuffer, f: impl Fn(f32) -> f32) -> PixelBuffer {
    let mut output = img.clone();
    for pixel in output.pixels_mut() {
        let value = to_channel(f(luma(pixel)));
        *pixel = gray_pixel(value, pixel[3]);
    }
    output
}

/// Converts to grayscale using the BT.601 weights, alpha untouched.
pub fn grayscale(img: &PixelBuffer) -> PixelBuffer {
    map_gray(img, |gray| gray)
}

/// Scales the image up so its short side reaches `target`.
///
/// The factor is capped so neither side exceeds `MAX_DIMENSION`. Images that
/// already reach the target come back unchanged unless they exceed the cap,
/// in which case they are scaled down to fit it.
pub fn upscale_to_target(img: &PixelBuffer, target: u32) -> PixelBuffer {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return img.clone();
    }

    let (w, h) = (width as f64, height as f64);
    let mut scale = 1.0f64;
    if width < target || height < target {
        scale = (target as f64 / w).max(target as f64 / h);
    }
    let cap = (MAX_DIMENSION as f64 / w).min(MAX_DIMENSION as f64 / h);
    scale = scale.min(cap);

    let new_width = ((w * scale).floor() as u32).clamp(1, MAX_DIMENSION);
    let new_height = ((h * scale).floor() as u32).clamp(1, MAX_DIMENSION);
    if new_width == width && new_height == height {
        return img.clone();
    }

    imageops::resize(img, new_width, new_height, FilterType::CatmullRom)
}

/// Applies the 3x3 Laplacian sharpening kernel to R, G and B.
///
/// Border pixels are copied unchanged.
pub fn sharpen(img: &PixelBuffer) -> PixelBuffer {
    const KERNEL: [[i32; 3]; 3] = [[0, -1, 0], [-1, 5, -1], [0, -1, 0]];

    let (width, height) = img.dimensions();
    let mut output = img.clone();
    if width < 3 || height < 3 {
        return output;
    }

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut sums = [0i32; 3];
            for (ky, row) in KERNEL.iter().enumerate() {
                for (kx, &weight) in row.iter().enumerate() {
                    if weight == 0 {
                        continue;
                    }
                    let source = img.get_pixel(x + kx as u32 - 1, y + ky as u32 - 1);
                    for (c, sum) in sums.iter_mut().enumerate() {
                        *sum += source[c] as i32 * weight;
                    }
                }
            }
            let target = output.get_pixel_mut(x, y);
            for (c, sum) in sums.iter().enumerate() {
                target[c] = (*sum).clamp(0, 255) as u8;
            }
        }
    }

    output
}

/// Builds a 256-bin histogram of the R channel.
///
/// Callers convert to grayscale first, so R carries the intensity.
pub fn intensity_histogram(img: &PixelBuffer) -> [u64; 256] {
    let mut histogram = [0u64; 256];
    for pixel in img.pixels() {
        histogram[pixel[0] as usize] += 1;
    }
    histogram
}

/// Otsu's method: the cut point maximizing between-class variance.
///
/// On ties the lowest threshold wins. Returns 0 for an empty or single-valued
/// histogram.
pub fn otsu_threshold(histogram: &[u64; 256], total_pixels: u64) -> u8 {
    let sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut sum_background = 0.0f64;
    let mut weight_background = 0u64;
    let mut max_variance = 0.0f64;
    let mut threshold = 0u8;

    for (i, &count) in histogram.iter().enumerate() {
        weight_background += count;
        if weight_background == 0 {
            continue;
        }
        let weight_foreground = total_pixels.saturating_sub(weight_background);
        if weight_foreground == 0 {
            break;
        }

        sum_background += i as f64 * count as f64;
        let mean_background = sum_background / weight_background as f64;
        let mean_foreground = (sum - sum_background) / weight_foreground as f64;
        let diff = mean_background - mean_foreground;
        let variance = weight_background as f64 * weight_foreground as f64 * diff * diff;

        if variance > max_variance {
            max_variance = variance;
            threshold = i as u8;
        }
    }

    threshold
}

/// Intensity statistics of a grayscale image.
#[derive(Debug, Clone, Copy)]
struct IntensityStats {
    min: u8,
    max: u8,
    median: u8,
    dark_count: u64,
    bright_count: u64,
    total: u64,
}

impl IntensityStats {
    fn from_histogram(histogram: &[u64; 256]) -> Self {
        let total: u64 = histogram.iter().sum();
        let min = histogram.iter().position(|&c| c > 0).unwrap_or(0) as u8;
        let max = histogram.iter().rposition(|&c| c > 0).unwrap_or(0) as u8;

        // Value at sorted index floor(total / 2)
        let median_index = total / 2;
        let mut seen = 0u64;
        let mut median = max;
        for (value, &count) in histogram.iter().enumerate() {
            seen += count;
            if seen > median_index {
                median = value as u8;
                break;
            }
        }

        let dark_count = histogram[..DARK_CUTOFF as usize].iter().sum();
        let bright_count = histogram[BRIGHT_CUTOFF as usize + 1..].iter().sum();

        Self {
            min,
            max,
            median,
            dark_count,
            bright_count,
            total,
        }
    }

    fn classify(&self) -> DisplayClass {
        let total = self.total as f64;
        let dark = self.dark_count as f64;
        let bright = self.bright_count as f64;
        if dark > total / 8.0 && bright < total / 10.0 {
            DisplayClass::DarkText
        } else if bright > total / 15.0 {
            DisplayClass::BrightDisplay
        } else {
            DisplayClass::Neutral
        }
    }
}

/// Threshold and polarity chosen for one image by `adaptive_binarize`.
#[derive(Debug, Clone, Copy)]
struct BinarizePlan {
    mode: BinarizeMode,
    class: DisplayClass,
    otsu: f32,
    threshold: f32,
    stats: IntensityStats,
    range: f32,
}

impl BinarizePlan {
    /// Returns None for an empty histogram.
    fn from_histogram(histogram: &[u64; 256], mode: BinarizeMode) -> Option<Self> {
        let stats = IntensityStats::from_histogram(histogram);
        if stats.total == 0 {
            return None;
        }

        let class = stats.classify();
        let otsu = otsu_threshold(histogram, stats.total) as f32;
        let range = match stats.max - stats.min {
            0 => 1.0,
            r => r as f32,
        };
        let threshold = match class {
            DisplayClass::DarkText | DisplayClass::BrightDisplay => otsu,
            DisplayClass::Neutral => {
                (otsu + stats.min as f32 + range * mode.range_fraction()) / 2.0
            }
        };

        Some(Self {
            mode,
            class,
            otsu,
            threshold,
            stats,
            range,
        })
    }

    fn inverted_polarity(&self) -> bool {
        self.class != DisplayClass::Neutral
    }

    /// Whether a grayscale value becomes white (255) in the output.
    fn is_lit(&self, gray: u8) -> bool {
        let threshold = self.threshold;
        let mut value = gray as f32;
        if self.class == DisplayClass::DarkText && value < threshold {
            value = 255.0 - value;
        }

        let local_contrast = (value - self.stats.median as f32).abs() / self.range;
        let mut enhanced = (value - self.stats.min as f32) / self.range * 255.0;
        enhanced = (enhanced * self.mode.enhance_factor(local_contrast)).min(255.0);
        enhanced = 255.0 * (enhanced.max(0.0) / 255.0).powf(1.0 / 1.5);

        let inverted = self.inverted_polarity();
        let mut lit = if inverted {
            enhanced < threshold
        } else {
            enhanced > threshold
        };

        // Keep near-threshold strokes from being blackened
        if inverted && value < threshold * 1.2 {
            lit = true;
        }
        if value > threshold * 1.5 {
            lit = true;
        }
        lit
    }
}

/// Grayscale, sharpen, classify, contrast-boost and binarize to {0, 255},
/// then remove speckles with a morphological open.
///
/// Dark-text and bright-display images use the Otsu threshold and inverted
/// polarity. Everything else averages Otsu with a mode-dependent fraction of
/// the intensity range.
pub fn adaptive_binarize(img: &PixelBuffer, mode: BinarizeMode) -> PixelBuffer {
    let mut work = sharpen(&grayscale(img));

    let histogram = intensity_histogram(&work);
    let Some(plan) = BinarizePlan::from_histogram(&histogram, mode) else {
        return work;
    };

    crate::log(&format!(
        "Binarize ({}): {}x{}, class={:?}, otsu={}, threshold={:.1}, range={}-{}, median={}",
        mode.name(),
        work.width(),
        work.height(),
        plan.class,
        plan.otsu,
        plan.threshold,
        plan.stats.min,
        plan.stats.max,
        plan.stats.median
    ));

    for pixel in work.pixels_mut() {
        let lit = plan.is_lit(pixel[0]);
        *pixel = gray_pixel(if lit { 255 } else { 0 }, pixel[3]);
    }

    morphological_open(&work)
}

/// 3x3 erosion followed by 3x3 dilation over R, G and B.
///
/// Only interior pixels are filtered. Images above `MORPHOLOGY_PIXEL_LIMIT`
/// are returned as an unchanged copy.
pub fn morphological_open(img: &PixelBuffer) -> PixelBuffer {
    let (width, height) = img.dimensions();
    if width as u64 * height as u64 > MORPHOLOGY_PIXEL_LIMIT {
        crate::log("Image too large, skipping morphological open");
        return img.clone();
    }
    if width < 3 || height < 3 {
        return img.clone();
    }

    let eroded = neighborhood_filter(img, img, |a, b| a.min(b), 255);
    neighborhood_filter(img, &eroded, |a, b| a.max(b), 0)
}

/// Reduces each interior pixel's 3x3 R-channel neighborhood in `source` with
/// `reduce`, writing into a copy of `base`.
fn neighborhood_filter(
    base: &PixelBuffer,
    source: &PixelBuffer,
    reduce: impl Fn(u8, u8) -> u8,
    init: u8,
) -> PixelBuffer {
    let (width, height) = source.dimensions();
    let mut output = base.clone();

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut acc = init;
            for ny in y - 1..=y + 1 {
                for nx in x - 1..=x + 1 {
                    acc = reduce(acc, source.get_pixel(nx, ny)[0]);
                }
            }
            let pixel = output.get_pixel_mut(x, y);
            pixel[0] = acc;
            pixel[1] = acc;
            pixel[2] = acc;
        }
    }

    output
}

/// Linear stretch of the grayscale range to 0..255, multiplied by `gain`.
pub fn contrast_stretch(img: &PixelBuffer, gain: f32) -> PixelBuffer {
    let (min, max) = img
        .pixels()
        .map(luma)
        .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let range = if max - min > 0.0 { max - min } else { 1.0 };

    map_gray(img, |gray| (gray - min) / range * 255.0 * gain)
}

/// Sobel gradient magnitude on the grayscale image, doubled and clamped.
///
/// Border pixels are copied unchanged.
pub fn edge_detect(img: &PixelBuffer) -> PixelBuffer {
    let (width, height) = img.dimensions();
    let mut output = img.clone();
    if width < 3 || height < 3 {
        return output;
    }

    let gray: Vec<f32> = img.pixels().map(luma).collect();
    let at = |x: u32, y: u32| gray[(y * width + x) as usize];

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let gx = -at(x - 1, y - 1) + at(x + 1, y - 1) - 2.0 * at(x - 1, y)
                + 2.0 * at(x + 1, y)
                - at(x - 1, y + 1)
                + at(x + 1, y + 1);
            let gy = -at(x - 1, y - 1) - 2.0 * at(x, y - 1) - at(x + 1, y - 1)
                + at(x - 1, y + 1)
                + 2.0 * at(x, y + 1)
                + at(x + 1, y + 1);

            let edge = to_channel(((gx * gx + gy * gy).sqrt() * 2.0).min(255.0));
            let pixel = output.get_pixel_mut(x, y);
            *pixel = gray_pixel(edge, pixel[3]);
        }
    }

    output
}

/// Grayscale then `255 - value`.
pub fn invert(img: &PixelBuffer) -> PixelBuffer {
    map_gray(img, |gray| 255.0 - gray)
}

/// Grayscale then power-law tone curve. `gamma < 1` lifts highlights,
/// `gamma > 1` deepens shadows.
pub fn brightness_gamma(img: &PixelBuffer, gamma: f32) -> PixelBuffer {
    map_gray(img, |gray| 255.0 * (gray / 255.0).powf(gamma))
}

/// Upscale only, leaving gradients untouched.
pub fn minimal(img: &PixelBuffer, target: u32) -> PixelBuffer {
    upscale_to_target(img, target)
}
