//! Plate crop preprocessing
//!
//! Prepares a cropped plate region for the recognition model. The steps run
//! in a fixed order and every one of them is deterministic: the same crop
//! always yields a bit-identical output matrix.

use image::{GrayImage, Luma, RgbImage};
use imageproc::morphology::{grayscale_open, Mask};

/// Upscale factor applied before recognition; small plates need denser glyphs
const UPSCALE: u32 = 3;
/// CLAHE clip limit, relative to a uniform histogram
const CLAHE_CLIP_LIMIT: f32 = 2.0;
/// CLAHE tile grid is CLAHE_TILES x CLAHE_TILES
const CLAHE_TILES: u32 = 8;
/// Bilateral filter window edge length
const BILATERAL_WINDOW: u32 = 9;
/// Bilateral filter spatial and color sigma
const BILATERAL_SIGMA: f32 = 75.0;
/// Gamma for midtone darkening; separates print from background
const GAMMA: f32 = 1.2;

/// Run the full preprocessing pipeline on a cropped plate region.
///
/// Grayscale, 3x cubic upscale, CLAHE, bilateral smoothing, morphological
/// opening, then gamma correction via lookup table.
pub fn prepare_plate(crop: &RgbImage) -> GrayImage {
    let gray = rgb_to_grayscale(crop);
    let upscaled = image::imageops::resize(
        &gray,
        gray.width() * UPSCALE,
        gray.height() * UPSCALE,
        image::imageops::FilterType::CatmullRom,
    );
    let equalized = clahe(&upscaled, CLAHE_CLIP_LIMIT, CLAHE_TILES);
    let smoothed = bilateral_filter(&equalized, BILATERAL_WINDOW, BILATERAL_SIGMA, BILATERAL_SIGMA);
    // 3x3 square structuring element; removes bright speckle noise
    let opened = grayscale_open(&smoothed, &Mask::square(1));
    apply_gamma(&opened, GAMMA)
}

/// Convert RGB to grayscale with standard luminance weights
fn rgb_to_grayscale(img: &RgbImage) -> GrayImage {
    let mut gray = GrayImage::new(img.width(), img.height());

    for (x, y, pixel) in img.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let value = (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32) as u8;
        gray.put_pixel(x, y, Luma([value]));
    }

    gray
}

/// Contrast-limited adaptive histogram equalization.
///
/// The image is divided into a `tiles` x `tiles` grid. Each tile gets its own
/// clipped-histogram remapping table; pixels are remapped by bilinear
/// interpolation between the four surrounding tile tables, which avoids
/// visible tile seams.
fn clahe(img: &GrayImage, clip_limit: f32, tiles: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    let tiles = tiles.min(w).min(h).max(1);
    let tile_w = w.div_ceil(tiles);
    let tile_h = h.div_ceil(tiles);
    let tx_count = w.div_ceil(tile_w) as usize;
    let ty_count = h.div_ceil(tile_h) as usize;

    let mut tables = vec![[0u8; 256]; tx_count * ty_count];

    for ty in 0..ty_count {
        for tx in 0..tx_count {
            let x0 = tx as u32 * tile_w;
            let y0 = ty as u32 * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);
            let area = (x1 - x0) * (y1 - y0);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[img.get_pixel(x, y).0[0] as usize] += 1;
                }
            }

            // Clip the histogram and spread the excess uniformly over all bins
            let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > limit {
                    excess += *bin - limit;
                    *bin = limit;
                }
            }
            let bonus = excess / 256;
            for bin in hist.iter_mut() {
                *bin += bonus;
            }

            let table = &mut tables[ty * tx_count + tx];
            let scale = 255.0 / area as f32;
            let mut cdf = 0u32;
            for (value, slot) in table.iter_mut().enumerate() {
                cdf += hist[value];
                *slot = (cdf as f32 * scale).round().min(255.0) as u8;
            }
        }
    }

    let mut out = GrayImage::new(w, h);

    for y in 0..h {
        for x in 0..w {
            let value = img.get_pixel(x, y).0[0] as usize;

            // Position relative to tile centers
            let fx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
            let fy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
            let wx = fx - fx.floor();
            let wy = fy - fy.floor();

            let tx0 = (fx.floor() as i32).clamp(0, tx_count as i32 - 1) as usize;
            let tx1 = (fx.floor() as i32 + 1).clamp(0, tx_count as i32 - 1) as usize;
            let ty0 = (fy.floor() as i32).clamp(0, ty_count as i32 - 1) as usize;
            let ty1 = (fy.floor() as i32 + 1).clamp(0, ty_count as i32 - 1) as usize;

            let top = tables[ty0 * tx_count + tx0][value] as f32 * (1.0 - wx)
                + tables[ty0 * tx_count + tx1][value] as f32 * wx;
            let bottom = tables[ty1 * tx_count + tx0][value] as f32 * (1.0 - wx)
                + tables[ty1 * tx_count + tx1][value] as f32 * wx;
            let mapped = top * (1.0 - wy) + bottom * wy;

            out.put_pixel(x, y, Luma([mapped.round().clamp(0.0, 255.0) as u8]));
        }
    }

    out
}

/// Edge-preserving bilateral smoothing.
///
/// Weights each neighbor by spatial distance and intensity difference, so
/// flat regions are smoothed while character edges stay sharp.
fn bilateral_filter(img: &GrayImage, window: u32, sigma_color: f32, sigma_space: f32) -> GrayImage {
    let (w, h) = img.dimensions();
    let radius = (window / 2) as i32;

    let inv_space = -0.5 / (sigma_space * sigma_space);
    let mut space_kernel = Vec::with_capacity((window * window) as usize);
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            space_kernel.push(((dx * dx + dy * dy) as f32 * inv_space).exp());
        }
    }

    let inv_color = -0.5 / (sigma_color * sigma_color);
    let mut range_kernel = [0.0f32; 256];
    for (diff, slot) in range_kernel.iter_mut().enumerate() {
        *slot = ((diff * diff) as f32 * inv_color).exp();
    }

    let mut out = GrayImage::new(w, h);

    for y in 0..h as i32 {
        for x in 0..w as i32 {
            let center = img.get_pixel(x as u32, y as u32).0[0] as i32;
            let mut acc = 0.0f32;
            let mut norm = 0.0f32;
            let mut k = 0;

            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let spatial = space_kernel[k];
                    k += 1;

                    let nx = (x + dx).clamp(0, w as i32 - 1);
                    let ny = (y + dy).clamp(0, h as i32 - 1);
                    let neighbor = img.get_pixel(nx as u32, ny as u32).0[0] as i32;

                    let weight = spatial * range_kernel[(neighbor - center).unsigned_abs() as usize];
                    acc += weight * neighbor as f32;
                    norm += weight;
                }
            }

            out.put_pixel(x as u32, y as u32, Luma([(acc / norm).round() as u8]));
        }
    }

    out
}

/// Gamma remapping table: table[i] = ((i/255)^(1/gamma)) * 255
fn gamma_table(gamma: f32) -> [u8; 256] {
    let inv_gamma = 1.0 / gamma;
    let mut table = [0u8; 256];

    for (i, slot) in table.iter_mut().enumerate() {
        *slot = ((i as f32 / 255.0).powf(inv_gamma) * 255.0) as u8;
    }

    table
}

/// Remap intensities through the gamma lookup table
fn apply_gamma(img: &GrayImage, gamma: f32) -> GrayImage {
    let table = gamma_table(gamma);
    let mut out = img.clone();

    for pixel in out.pixels_mut() {
        pixel.0[0] = table[pixel.0[0] as usize];
    }

    out
}
