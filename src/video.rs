//! Video container I/O through OpenCV.

use std::path::{Path, PathBuf};

use image::RgbImage;
use opencv::{
    core::{self, Mat},
    prelude::*,
    videoio,
};
use tracing::{debug, info};

use crate::cv;
use crate::error::Error;
use crate::frame::{Frame, FrameIter, FrameSink, FrameSource};

/// A video file that is reopened for every pass.
pub struct VideoFile {
    path: String,
    fps: f32,
    dims: (u32, u32),
    total: usize,
}

impl VideoFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_string_lossy().to_string();
        let cam = open_capture(&path)?;

        let fps = cam.get(videoio::CAP_PROP_FPS)? as f32;
        let width = cam.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let height = cam.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
        let total = cam.get(videoio::CAP_PROP_FRAME_COUNT)?.max(0.0) as usize;

        if width == 0 || height == 0 {
            return Err(Error::EmptyVideo);
        }

        info!("video {}x{} {} frames @ {:.2} fps", width, height, total, fps);

        Ok(Self {
            path,
            fps: if fps > 0.0 { fps } else { 24.0 },
            dims: (width, height),
            total,
        })
    }

    #[inline]
    pub fn dims(&self) -> (u32, u32) {
        self.dims
    }

    /// Frame count reported by the container; may be an estimate.
    #[inline]
    pub fn frame_count(&self) -> usize {
        self.total
    }
}

fn open_capture(path: &str) -> Result<videoio::VideoCapture, Error> {
    let cam = videoio::VideoCapture::from_file(path, videoio::CAP_ANY)?;
    if !videoio::VideoCapture::is_opened(&cam)? {
        return Err(Error::Decode {
            index: 0,
            reason: format!("unable to open {}", path),
        });
    }

    Ok(cam)
}

fn mat_to_rgb(mat: &Mat, index: usize) -> Result<RgbImage, Error> {
    let rgb = cv::swap_red_blue(mat)?;

    cv::to_rgb_image(&rgb).ok_or_else(|| Error::Decode {
        index,
        reason: "unexpected pixel layout".to_string(),
    })
}

struct CaptureIter {
    cam: videoio::VideoCapture,
    index: usize,
    done: bool,
}

impl Iterator for CaptureIter {
    type Item = Result<Frame, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut mat = Mat::default();
        match self.cam.read(&mut mat) {
            Ok(true) if mat.cols() > 0 && mat.rows() > 0 => {}
            Ok(_) => {
                self.done = true;
                return None;
            }
            Err(err) => {
                self.done = true;
                return Some(Err(err.into()));
            }
        }

        let index = self.index;
        self.index += 1;

        Some(mat_to_rgb(&mat, index).map(|image| Frame { index, image }))
    }
}

impl FrameSource for VideoFile {
    fn fps(&self) -> f32 {
        self.fps
    }

    fn frames(&self) -> Result<FrameIter<'_>, Error> {
        let cam = open_capture(&self.path)?;

        Ok(Box::new(CaptureIter {
            cam,
            index: 0,
            done: false,
        }))
    }
}

pub struct VideoWriter {
    writer: Option<videoio::VideoWriter>,
    size: Option<(i32, i32)>,
    out_file: PathBuf,
    fps: f32,
}

impl VideoWriter {
    pub fn new<P: AsRef<Path>>(out_file: P, fps: f32) -> Self {
        Self {
            writer: None,
            size: None,
            out_file: out_file.as_ref().to_path_buf(),
            fps,
        }
    }

    pub fn release(&mut self) -> Result<(), Error> {
        if let Some(mut w) = self.writer.take() {
            w.release()?;
        }

        Ok(())
    }

    fn reinit(&mut self, size: (i32, i32)) -> Result<(), Error> {
        self.release()?;

        debug!(path = %self.out_file.display(), "opening video writer");
        self.size = Some(size);
        self.writer = Some(videoio::VideoWriter::new(
            &self.out_file.to_string_lossy(),
            videoio::VideoWriter::fourcc(b'm' as _, b'p' as _, b'4' as _, b'v' as _)?,
            self.fps as f64,
            core::Size::new(size.0, size.1),
            true,
        )?);

        Ok(())
    }
}

impl FrameSink for VideoWriter {
    fn write(&mut self, frame: &Frame) -> Result<(), Error> {
        let (w, h) = frame.dims();
        let size = (w as i32, h as i32);

        if self.writer.is_none() || self.size != Some(size) {
            self.reinit(size)?;
        }

        let mat = cv::swap_red_blue(&cv::rgb_mat(&frame.image)?)?;

        if let Some(writer) = self.writer.as_mut() {
            writer.write(&mat)?;
        }

        Ok(())
    }

    fn finish(&mut self) -> Result<(), Error> {
        self.release()
    }
}
