// SPDX-License-Identifier: CEPL-1.0
use crate::AssetError;

/// RGBA8 pixels plus the channel count the source file had.
#[derive(Clone, Debug)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn decode(bytes: &[u8]) -> Result<Self, AssetError> {
        let img = image::load_from_memory(bytes)?;
        let channels = img.color().channel_count();
        let rgba = img.into_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self {
            width,
            height,
            channels,
            pixels: rgba.into_raw(),
        })
    }

    /// Two-tone pattern used when a configured texture is absent.
    pub fn checkerboard(size: u32, cell: u32) -> Self {
        let size = size.max(1);
        let cell = cell.max(1);
        let mut pixels = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let light = ((x / cell) + (y / cell)) % 2 == 0;
                let v = if light { 0xe0 } else { 0x30 };
                pixels.extend_from_slice(&[v, v, v, 0xff]);
            }
        }
        Self {
            width: size,
            height: size,
            channels: 4,
            pixels,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_png_to_rgba() {
        let mut png = Vec::new();
        let src = image::RgbImage::from_pixel(3, 2, image::Rgb([10, 20, 30]));
        src.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let img = DecodedImage::decode(&png).unwrap();
        assert_eq!((img.width, img.height, img.channels), (3, 2, 3));
        assert_eq!(img.byte_len(), 3 * 2 * 4);
        assert_eq!(&img.pixels[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            DecodedImage::decode(b"not an image"),
            Err(AssetError::Decode(_))
        ));
    }

    #[test]
    fn checkerboard_alternates() {
        let img = DecodedImage::checkerboard(4, 2);
        assert_eq!(img.byte_len(), 64);
        assert_ne!(img.pixels[0], img.pixels[2 * 4]);
        assert_eq!(img.pixels[0], img.pixels[(2 * 4 + 2) * 4]);
    }
}
