//! Conversions between `image` buffers and OpenCV matrices.

use image::RgbImage;
use opencv::{core::Mat, imgproc, prelude::*};

use crate::error::Error;

/// Owned 3-channel matrix holding the pixels of `image` in RGB order.
pub fn rgb_mat(image: &RgbImage) -> Result<Mat, Error> {
    let flat = Mat::from_slice(image.as_raw())?;
    let mat = flat.reshape(3, image.height() as i32)?;

    Ok(mat.try_clone()?)
}

/// Single-channel luminance of `image`.
pub fn gray_mat(image: &RgbImage) -> Result<Mat, Error> {
    let rgb = rgb_mat(image)?;
    let mut gray = Mat::default();
    imgproc::cvt_color(&rgb, &mut gray, imgproc::COLOR_RGB2GRAY, 0)?;

    Ok(gray)
}

/// Converts between BGR and RGB order; the swap is its own inverse.
pub fn swap_red_blue(mat: &Mat) -> Result<Mat, Error> {
    let mut out = Mat::default();
    imgproc::cvt_color(mat, &mut out, imgproc::COLOR_BGR2RGB, 0)?;

    Ok(out)
}

/// Copies an RGB-ordered matrix of the same size back into `image`.
pub fn copy_into(mat: &Mat, image: &mut RgbImage) -> Result<(), Error> {
    let owned;
    let mat = if mat.is_continuous() {
        mat
    } else {
        owned = mat.try_clone()?;
        &owned
    };

    let bytes = mat.data_bytes()?;
    if bytes.len() != image.len() {
        return Err(Error::Config(format!(
            "matrix of {} bytes does not fit a {}x{} frame",
            bytes.len(),
            image.width(),
            image.height()
        )));
    }

    image.copy_from_slice(bytes);
    Ok(())
}

/// Wraps an RGB-ordered matrix into an owned image.
pub fn to_rgb_image(mat: &Mat) -> Option<RgbImage> {
    let (w, h) = (mat.cols() as u32, mat.rows() as u32);
    let mut image = RgbImage::new(w, h);

    copy_into(mat, &mut image).ok()?;
    Some(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn rgb_round_trip_keeps_channel_order() {
        let img = RgbImage::from_fn(7, 5, |x, y| Rgb([x as u8 * 30, y as u8 * 40, 9]));
        let mat = rgb_mat(&img).unwrap();
        assert_eq!((mat.cols(), mat.rows(), mat.channels()), (7, 5, 3));

        let bgr = swap_red_blue(&mat).unwrap();
        assert_eq!(&bgr.data_bytes().unwrap()[3..6], &[9, 0, 30]);

        let back = to_rgb_image(&swap_red_blue(&bgr).unwrap()).unwrap();
        assert_eq!(back, img);
    }

    #[test]
    fn gray_is_single_channel() {
        let img = RgbImage::from_pixel(4, 3, Rgb([100, 100, 100]));
        let gray = gray_mat(&img).unwrap();

        assert_eq!(gray.channels(), 1);
        assert!(gray.data_bytes().unwrap().iter().all(|&v| v == 100));
    }
}
