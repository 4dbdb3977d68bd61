//! Screenshot pixel inspection
//!
//! Screenshots are written by the emulator; these helpers read them back to
//! decide whether a routine hit its target.

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};

/// Marker color drawn by [`save_with_crosshair`]
pub const CROSSHAIR_COLOR: Rgb<u8> = Rgb([57, 255, 20]);

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to load screenshot {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to save {}: {source}", path.display())]
    Save {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("pixel ({x}, {y}) outside {width}x{height} screenshot")]
    OutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
}

fn load_rgb(path: &Path) -> Result<RgbImage, ProbeError> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|source| ProbeError::Load {
            path: path.to_path_buf(),
            source,
        })
}

fn check_bounds(img: &RgbImage, x: u32, y: u32) -> Result<(), ProbeError> {
    if x >= img.width() || y >= img.height() {
        return Err(ProbeError::OutOfBounds {
            x,
            y,
            width: img.width(),
            height: img.height(),
        });
    }
    Ok(())
}

/// RGB value at `(x, y)`; alpha is dropped
pub fn pixel_rgb(path: &Path, x: u32, y: u32) -> Result<[u8; 3], ProbeError> {
    let img = load_rgb(path)?;
    check_bounds(&img, x, y)?;
    Ok(img.get_pixel(x, y).0)
}

/// Lowercase `#rrggbb` at `(x, y)`
pub fn pixel_hex(path: &Path, x: u32, y: u32) -> Result<String, ProbeError> {
    let [r, g, b] = pixel_rgb(path, x, y)?;
    Ok(format!("#{:02x}{:02x}{:02x}", r, g, b))
}

/// Normalize a user-written color (`#ABCDEF`, `abcdef`) for comparison
pub fn normalize_hex(color: &str) -> String {
    let trimmed = color.trim().trim_start_matches('#');
    format!("#{}", trimmed.to_ascii_lowercase())
}

/// Copy `src` to `dst` with a full-height and full-width line through
/// `(x, y)`, for lining up a probe point by eye.
pub fn save_with_crosshair(src: &Path, dst: &Path, x: u32, y: u32) -> Result<(), ProbeError> {
    let mut img = load_rgb(src)?;
    check_bounds(&img, x, y)?;

    for row in 0..img.height() {
        img.put_pixel(x, row, CROSSHAIR_COLOR);
    }
    for col in 0..img.width() {
        img.put_pixel(col, y, CROSSHAIR_COLOR);
    }

    img.save(dst).map_err(|source| ProbeError::Save {
        path: dst.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_test_png(path: &Path) {
        let img = RgbImage::from_fn(4, 3, |x, y| {
            if x == 2 && y == 1 {
                Rgb([0x12, 0xab, 0xff])
            } else {
                Rgb([0, 0, 0])
            }
        });
        img.save(path).unwrap();
    }

    #[test]
    fn test_pixel_hex() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.png");
        write_test_png(&path);

        assert_eq!(pixel_hex(&path, 2, 1).unwrap(), "#12abff");
        assert_eq!(pixel_hex(&path, 0, 0).unwrap(), "#000000");
    }

    #[test]
    fn test_pixel_out_of_bounds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.png");
        write_test_png(&path);

        assert!(matches!(
            pixel_hex(&path, 4, 0),
            Err(ProbeError::OutOfBounds { width: 4, height: 3, .. })
        ));
        assert!(matches!(
            pixel_rgb(&path, 0, 3),
            Err(ProbeError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            pixel_hex(&dir.path().join("missing.png"), 0, 0),
            Err(ProbeError::Load { .. })
        ));
    }

    #[test]
    fn test_normalize_hex() {
        assert_eq!(normalize_hex("#ABCDEF"), "#abcdef");
        assert_eq!(normalize_hex(" 12ab0f "), "#12ab0f");
    }

    #[test]
    fn test_crosshair() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("0.png");
        let dst = dir.path().join("0-crosshair.png");
        write_test_png(&src);

        save_with_crosshair(&src, &dst, 1, 2).unwrap();

        assert_eq!(pixel_rgb(&dst, 1, 0).unwrap(), CROSSHAIR_COLOR.0);
        assert_eq!(pixel_rgb(&dst, 3, 2).unwrap(), CROSSHAIR_COLOR.0);
        assert_eq!(pixel_rgb(&dst, 0, 0).unwrap(), [0, 0, 0]);
        // Source untouched
        assert_eq!(pixel_hex(&src, 2, 1).unwrap(), "#12abff");
    }
}
