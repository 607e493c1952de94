/// Embedded JPEG extraction and preview rendering
///
/// Most RAW formats carry one or more JPEG renditions next to the sensor
/// data. Scanning for JPEG markers finds them without a RAW decoder:
/// - the first sizeable JPEG in the file head is a fast, low-fidelity stand-in
/// - the largest JPEG in the whole file is the camera's full-size preview

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use image::{imageops::FilterType, DynamicImage, ImageFormat};

use crate::error::Result;

/// How much of a RAW file to read when looking for a quick stand-in (256KB)
pub const HEAD_SCAN_BYTES: usize = 256 * 1024;

/// Smallest embedded JPEG worth showing as a stand-in
pub const MIN_PLACEHOLDER_BYTES: usize = 16 * 1024;

/// Supported RAW file extensions (common formats)
pub const RAW_EXTENSIONS: &[&str] = &[
    "nef", "dng", "cr2", "cr3", "arw", "raf", "orf", "rw2",
    "pef", "srw", "erf", "kdc", "dcr", "mos", "raw", "rwl",
];

/// Formats the image crate can decode directly
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff", "webp"];

const JPEG_START: [u8; 3] = [0xFF, 0xD8, 0xFF]; // Start Of Image (SOI)
const JPEG_END: [u8; 2] = [0xFF, 0xD9]; // End Of Image (EOI)

/// Lower-cased extension of `path`, if any
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

pub fn is_raw(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| RAW_EXTENSIONS.contains(&ext.as_str()))
}

/// True for anything worth reviewing: RAW files and plain images
pub fn is_reviewable(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| {
        RAW_EXTENSIONS.contains(&ext.as_str())
            || IMAGE_EXTENSIONS.contains(&ext.as_str())
            || ext == "heic"
    })
}

/// Read at most `max_bytes` from the start of `path`
pub fn read_head(path: &Path, max_bytes: usize) -> std::io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut data = Vec::with_capacity(max_bytes);
    file.take(max_bytes as u64).read_to_end(&mut data)?;
    Ok(data)
}

/// Every complete JPEG in `data`, as `(start, end)` byte ranges (end exclusive)
fn jpeg_ranges(data: &[u8]) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut pos = 0;

    while pos + JPEG_START.len() <= data.len() {
        if !data[pos..].starts_with(&JPEG_START) {
            pos += 1;
            continue;
        }
        match data[pos..].windows(2).position(|w| w == JPEG_END) {
            Some(offset) => {
                let end = pos + offset + JPEG_END.len();
                ranges.push((pos, end));
                pos = end;
            }
            // No end marker means every later start is truncated too
            None => break,
        }
    }

    ranges
}

/// First embedded JPEG larger than `min_size`
pub fn first_jpeg(data: &[u8], min_size: usize) -> Option<&[u8]> {
    jpeg_ranges(data)
        .into_iter()
        .find(|(start, end)| end - start > min_size)
        .map(|(start, end)| &data[start..end])
}

/// Largest embedded JPEG in `data`
pub fn largest_jpeg(data: &[u8]) -> Option<&[u8]> {
    jpeg_ranges(data)
        .into_iter()
        .max_by_key(|(start, end)| end - start)
        .map(|(start, end)| &data[start..end])
}

/// Decode `encoded`, shrink it to fit a `size`×`size` box and re-encode as JPEG
pub fn render_preview(encoded: &[u8], size: u32) -> Result<Vec<u8>> {
    let img = image::load_from_memory(encoded)?;
    let preview = if img.width() > size || img.height() > size {
        img.resize(size, size, FilterType::Lanczos3)
    } else {
        img
    };

    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(preview.to_rgb8());
    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageFormat::Jpeg)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_jpeg(body_len: usize, fill: u8) -> Vec<u8> {
        let mut jpeg = JPEG_START.to_vec();
        jpeg.extend(std::iter::repeat(fill).take(body_len));
        jpeg.extend_from_slice(&JPEG_END);
        jpeg
    }

    #[test]
    fn test_first_and_largest_jpeg() {
        let small = fake_jpeg(100, 0x11);
        let big = fake_jpeg(1000, 0x22);

        let mut data = vec![0u8; 64];
        data.extend_from_slice(&small);
        data.extend(vec![0u8; 32]);
        data.extend_from_slice(&big);
        data.extend(vec![0u8; 16]);

        assert_eq!(first_jpeg(&data, 0), Some(small.as_slice()));
        assert_eq!(first_jpeg(&data, 500), Some(big.as_slice()));
        assert_eq!(largest_jpeg(&data), Some(big.as_slice()));
        assert_eq!(first_jpeg(&data, 5000), None);
    }

    #[test]
    fn test_truncated_jpeg_is_ignored() {
        let mut data = vec![0u8; 8];
        data.extend_from_slice(&JPEG_START);
        data.extend(vec![0x33u8; 50]);
        assert_eq!(largest_jpeg(&data), None);
        assert_eq!(largest_jpeg(&[]), None);
    }

    #[test]
    fn test_render_preview_fits_box() {
        let img = image::RgbImage::from_pixel(200, 100, image::Rgb([10, 200, 30]));
        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();

        let preview = render_preview(png.get_ref(), 50).unwrap();
        let decoded = image::load_from_memory_with_format(&preview, ImageFormat::Jpeg).unwrap();
        assert_eq!(decoded.width(), 50);
        assert_eq!(decoded.height(), 25);
    }

    #[test]
    fn test_extension_checks() {
        assert!(is_raw(Path::new("a/DSC_0001.NEF")));
        assert!(!is_raw(Path::new("a/photo.jpg")));
        assert!(is_reviewable(Path::new("photo.JPG")));
        assert!(!is_reviewable(Path::new("notes.txt")));
    }
}
