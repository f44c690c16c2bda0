//! Decoded frames and the restartable sources that produce them.
//!
//! A [`FrameSource`] is a factory: every call to [`FrameSource::frames`]
//! starts a fresh lazy pass over the video, so the pipeline can walk the
//! footage several times while holding a single frame in memory per pass.

use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::debug;

use crate::error::Error;

#[derive(Debug, Clone)]
pub struct Frame {
    pub index: usize,
    pub image: RgbImage,
}

impl Frame {
    #[inline]
    pub fn dims(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

pub type FrameIter<'a> = Box<dyn Iterator<Item = Result<Frame, Error>> + 'a>;

pub trait FrameSource {
    /// Frames per second of the underlying footage.
    fn fps(&self) -> f32;

    /// Starts a new pass from the first frame.
    fn frames(&self) -> Result<FrameIter<'_>, Error>;
}

/// Receives annotated frames in order and encodes them.
pub trait FrameSink {
    fn write(&mut self, frame: &Frame) -> Result<(), Error>;

    fn finish(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

impl FrameSink for Vec<RgbImage> {
    fn write(&mut self, frame: &Frame) -> Result<(), Error> {
        self.push(frame.image.clone());
        Ok(())
    }
}

/// In-memory clip, mostly useful for tests and short synthetic inputs.
pub struct MemoryFrames {
    images: Vec<RgbImage>,
    fps: f32,
}

impl MemoryFrames {
    pub fn new(images: Vec<RgbImage>, fps: f32) -> Self {
        Self { images, fps }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl FrameSource for MemoryFrames {
    fn fps(&self) -> f32 {
        self.fps
    }

    fn frames(&self) -> Result<FrameIter<'_>, Error> {
        Ok(Box::new(self.images.iter().enumerate().map(|(index, image)| {
            Ok(Frame {
                index,
                image: image.clone(),
            })
        })))
    }
}

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "tif"];

/// A directory of still images ordered by file name, decoded one at a time.
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    fps: f32,
}

impl ImageSequence {
    pub fn open<P: AsRef<Path>>(dir: P, fps: f32) -> Result<Self, Error> {
        let mut paths = Vec::new();

        for entry in std::fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);

            if is_image {
                paths.push(path);
            }
        }

        if paths.is_empty() {
            return Err(Error::EmptyVideo);
        }

        paths.sort();
        debug!(count = paths.len(), dir = %dir.as_ref().display(), "image sequence opened");

        Ok(Self { paths, fps })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequence {
    fn fps(&self) -> f32 {
        self.fps
    }

    fn frames(&self) -> Result<FrameIter<'_>, Error> {
        Ok(Box::new(self.paths.iter().enumerate().map(|(index, path)| {
            let image = image::open(path).map_err(|err| Error::Decode {
                index,
                reason: err.to_string(),
            })?;

            Ok(Frame {
                index,
                image: image.to_rgb8(),
            })
        })))
    }
}

/// Writes every frame as `frame_NNNNNN.png` into a directory.
pub struct ImageSequenceWriter {
    dir: PathBuf,
    written: usize,
}

impl ImageSequenceWriter {
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self, Error> {
        std::fs::create_dir_all(dir.as_ref())?;

        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            written: 0,
        })
    }

    #[inline]
    pub fn written(&self) -> usize {
        self.written
    }
}

impl FrameSink for ImageSequenceWriter {
    fn write(&mut self, frame: &Frame) -> Result<(), Error> {
        let path = self.dir.join(format!("frame_{:06}.png", frame.index));
        frame.image.save(path)?;
        self.written += 1;

        Ok(())
    }
}
