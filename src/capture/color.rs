use std::sync::LazyLock;

use image::RgbaImage;

/// Color space the renderer writes its output in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ColorSpace {
    /// Values are already sRGB encoded and go into the PNG unchanged.
    #[default]
    Gamma,
    /// Values are linear and need the sRGB transfer function before encoding.
    Linear,
}

/// sRGB opto-electronic transfer function on a normalized component.
pub fn linear_to_srgb(c: f32) -> f32 {
    let c = c.clamp(0.0, 1.0);
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

static LINEAR_TO_SRGB_LUT: LazyLock<[u8; 256]> = LazyLock::new(|| {
    let mut lut = [0u8; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        *v = (linear_to_srgb(i as f32 / 255.0) * 255.0).round() as u8;
    }
    lut
});

/// Encodes the color channels of a linear image to sRGB in place. Alpha is left alone.
pub fn encode_srgb(image: &mut RgbaImage) {
    let lut = &*LINEAR_TO_SRGB_LUT;
    for pixel in image.pixels_mut() {
        for c in &mut pixel.0[..3] {
            *c = lut[*c as usize];
        }
    }
}

/// Applies the correction a frame rendered in `space` needs before PNG encoding.
pub fn correct_for_png(image: &mut RgbaImage, space: ColorSpace) {
    if space == ColorSpace::Linear {
        encode_srgb(image);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn transfer_function_endpoints() {
        assert_eq!(linear_to_srgb(0.0), 0.0);
        assert!((linear_to_srgb(1.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn transfer_function_brightens_midtones() {
        // linear 0.5 is ~0.735 in sRGB
        assert!((linear_to_srgb(0.5) - 0.735_357).abs() < 1e-4);
        assert!((linear_to_srgb(0.002) - 0.025_84).abs() < 1e-5);
    }

    #[test]
    fn encode_keeps_alpha() {
        let mut img = RgbaImage::from_pixel(2, 1, Rgba([128, 0, 255, 77]));
        encode_srgb(&mut img);
        assert_eq!(img.get_pixel(0, 0), &Rgba([188, 0, 255, 77]));
    }

    #[test]
    fn gamma_space_is_left_untouched() {
        let original = RgbaImage::from_pixel(3, 3, Rgba([10, 20, 30, 255]));
        let mut img = original.clone();
        correct_for_png(&mut img, ColorSpace::Gamma);
        assert_eq!(img, original);
    }
}
