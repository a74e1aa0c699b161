use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, Rgb, RgbImage};
use sha2::{Digest, Sha256};

pub const PANEL_WIDTH: u32 = 1080;
pub const PANEL_HEIGHT: u32 = 1920;
pub const STITCHED_WIDTH: u32 = PANEL_WIDTH * 2;
pub const JPEG_QUALITY: u8 = 90;

/// Opens `path` and checks that its bytes decode as an image, whatever the
/// extension says.
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("failed to sniff image format ({})", path.display()))?
        .decode()
        .with_context(|| format!("{} is not a readable image", path.display()))
}

pub fn check_image_file(path: &Path) -> Result<()> {
    load_image(path).map(|_| ())
}

/// Puts the story on the left and the product on the right of a
/// 2160x1920 canvas, each stretched to one 1080x1920 panel.
pub fn stitch(story: &DynamicImage, product: &DynamicImage) -> RgbImage {
    let mut canvas = RgbImage::new(STITCHED_WIDTH, PANEL_HEIGHT);
    imageops::replace(&mut canvas, &panel(story), 0, 0);
    imageops::replace(&mut canvas, &panel(product), i64::from(PANEL_WIDTH), 0);
    canvas
}

fn panel(image: &DynamicImage) -> RgbImage {
    let resized = image.resize_exact(PANEL_WIDTH, PANEL_HEIGHT, FilterType::Triangle);
    flatten_on_white(&resized)
}

fn flatten_on_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    flattened
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(Cursor::new(&mut bytes), JPEG_QUALITY);
    encoder
        .encode_image(&DynamicImage::ImageRgb8(image.clone()))
        .context("failed to encode stitched JPEG")?;
    Ok(bytes)
}

/// Stitches the two files and writes `stitched-<hash>.jpg` into `out_dir`.
/// The name is derived from the JPEG bytes, so restitching the same pair
/// overwrites the same file.
pub fn write_stitched(story_path: &Path, product_path: &Path, out_dir: &Path) -> Result<PathBuf> {
    let story = load_image(story_path).context("Failed to stitch images")?;
    let product = load_image(product_path).context("Failed to stitch images")?;
    let bytes = encode_jpeg(&stitch(&story, &product))?;

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let path = out_dir.join(format!("stitched-{}.jpg", short_digest(&bytes)));
    std::fs::write(&path, &bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    log::info!(
        "stitched {} + {} -> {}",
        story_path.display(),
        product_path.display(),
        path.display()
    );
    Ok(path)
}

fn short_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..4])
}

#[cfg(test)]
mod tests {
    use image::{GenericImageView, Rgba, RgbaImage};

    use super::*;

    fn solid(width: u32, height: u32, color: [u8; 4]) -> DynamicImage {
        let mut image = RgbaImage::new(width, height);
        for pixel in image.pixels_mut() {
            *pixel = Rgba(color);
        }
        DynamicImage::ImageRgba8(image)
    }

    #[test]
    fn stitch_places_story_left_and_product_right() {
        let story = solid(540, 960, [200, 10, 10, 255]);
        let product = solid(300, 300, [10, 10, 200, 255]);
        let canvas = stitch(&story, &product);
        assert_eq!(canvas.dimensions(), (STITCHED_WIDTH, PANEL_HEIGHT));
        assert_eq!(canvas.get_pixel(10, 10), &Rgb([200, 10, 10]));
        assert_eq!(canvas.get_pixel(PANEL_WIDTH - 1, PANEL_HEIGHT - 1), &Rgb([200, 10, 10]));
        assert_eq!(canvas.get_pixel(PANEL_WIDTH, 0), &Rgb([10, 10, 200]));
        assert_eq!(canvas.get_pixel(STITCHED_WIDTH - 1, 500), &Rgb([10, 10, 200]));
    }

    #[test]
    fn transparent_pixels_become_white() {
        let story = solid(10, 10, [0, 0, 0, 0]);
        let product = solid(10, 10, [0, 0, 0, 255]);
        let canvas = stitch(&story, &product);
        assert_eq!(canvas.get_pixel(5, 5), &Rgb([255, 255, 255]));
        assert_eq!(canvas.get_pixel(PANEL_WIDTH + 5, 5), &Rgb([0, 0, 0]));
    }

    #[test]
    fn write_stitched_produces_a_decodable_jpeg() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let story_path = temp.path().join("story.png");
        let product_path = temp.path().join("product.png");
        solid(108, 192, [240, 200, 40, 255]).save(&story_path)?;
        solid(64, 64, [20, 120, 220, 255]).save(&product_path)?;

        let out = write_stitched(&story_path, &product_path, &temp.path().join("out"))?;
        let name = out
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or_default()
            .to_string();
        assert!(name.starts_with("stitched-") && name.ends_with(".jpg"));
        assert_eq!(name.len(), "stitched-".len() + 8 + ".jpg".len());

        let decoded = load_image(&out)?;
        assert_eq!(decoded.dimensions(), (STITCHED_WIDTH, PANEL_HEIGHT));

        let again = write_stitched(&story_path, &product_path, &temp.path().join("out"))?;
        assert_eq!(again, out);
        Ok(())
    }

    #[test]
    fn non_image_files_are_rejected() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let bogus = temp.path().join("story.png");
        std::fs::write(&bogus, b"definitely not a png")?;
        assert!(check_image_file(&bogus).is_err());

        let product = temp.path().join("product.png");
        solid(8, 8, [1, 2, 3, 255]).save(&product)?;
        check_image_file(&product)?;
        let err = write_stitched(&bogus, &product, temp.path()).unwrap_err();
        assert_eq!(err.to_string(), "Failed to stitch images");
        Ok(())
    }
}
