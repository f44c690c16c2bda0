use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::Path;

use image::imageops::{self, FilterType};
use ndarray::prelude::*;
use tracing::warn;

use crate::detection::{Detection, ObjectClass};
use crate::error::Error;
use crate::frame::Frame;

/// Black-box object detector: one list of detections per input frame.
pub trait Detect {
    fn detect(&mut self, frames: &[Frame]) -> Result<Vec<Vec<Detection>>, Error>;
}

/// An inference backend taking an `NCHW` batch and returning `[batch, predictions, 4 + classes]`.
pub trait InferenceModel {
    /// Fixed `(width, height)` of the model input.
    fn input_size(&self) -> (u32, u32);

    fn run(&mut self, input: ArrayView4<'_, f32>) -> Result<Array3<f32>, Error>;
}

#[derive(Debug, Clone)]
pub struct YoloDecoderConfig {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Model class index to football class; `None` drops the class.
    pub class_map: Vec<Option<ObjectClass>>,
}

impl YoloDecoderConfig {
    pub fn new(confidence_threshold: f32) -> Self {
        Self {
            confidence_threshold,
            iou_threshold: 0.5,
            class_map: (0..4).map(ObjectClass::from_index).collect(),
        }
    }
}

impl Default for YoloDecoderConfig {
    fn default() -> Self {
        Self::new(0.1)
    }
}

pub struct YoloDecoder {
    config: YoloDecoderConfig,
}

/// Central `(x, y, w, h)` region of the frame with the aspect ratio of the model input.
pub fn crop_region(in_w: u32, in_h: u32, frame_width: u32, frame_height: u32) -> (f32, f32, f32, f32) {
    let (fw, fh) = (frame_width as f32, frame_height as f32);
    let in_a = in_h as f32 / in_w as f32;
    let frame_a = fh / fw;

    if in_a > frame_a {
        let w = fh / in_a;
        ((fw - w) / 2.0, 0.0, w, fh)
    } else {
        let h = fw * in_a;
        (0.0, (fh - h) / 2.0, fw, h)
    }
}

impl YoloDecoder {
    pub fn new(config: YoloDecoderConfig) -> Self {
        Self { config }
    }

    /// Decodes normalized `[cx, cy, w, h, class scores...]` rows into frame pixels.
    pub fn decode(
        &self,
        view: ArrayView3<'_, f32>,
        in_w: usize,
        in_h: usize,
        frame_width: u32,
        frame_height: u32,
        with_crop: bool,
    ) -> Vec<Vec<Detection>> {
        let shape = view.shape();
        let nbatches = shape[0];
        let pred_size = shape[2];
        let mut results: Vec<Vec<Detection>> = (0..nbatches).map(|_| vec![]).collect();

        if pred_size < 5 {
            return results;
        }

        let (ox, oy, ow, oh) = if with_crop {
            crop_region(in_w as u32, in_h as u32, frame_width, frame_height)
        } else {
            (0.0, 0.0, frame_width as f32, frame_height as f32)
        };

        for (batch, results) in results.iter_mut().enumerate() {
            let mut by_class: BTreeMap<ObjectClass, Vec<Detection>> = BTreeMap::new();

            for row in view.index_axis(Axis(0), batch).outer_iter() {
                let (x, y, w, h) = (
                    ox + row[0] * ow,
                    oy + row[1] * oh,
                    row[2] * ow,
                    row[3] * oh,
                );

                let mut class_index = None;
                let mut confidence = 0.0;

                for (idx, val) in row.iter().skip(4).copied().enumerate() {
                    if val > confidence {
                        class_index = Some(idx);
                        confidence = val;
                    }
                }

                let class = match class_index.and_then(|idx| self.config.class_map.get(idx)) {
                    Some(Some(class)) => *class,
                    _ => continue,
                };

                if confidence > self.config.confidence_threshold {
                    by_class.entry(class).or_default().push(Detection {
                        x,
                        y,
                        w,
                        h,
                        confidence,
                        class,
                    });
                }
            }

            for (_, dets) in by_class {
                results.extend(self.non_maximum_suppression(dets));
            }
        }

        results
    }

    fn non_maximum_suppression(&self, mut dets: Vec<Detection>) -> Vec<Detection> {
        dets.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut kept: Vec<Detection> = Vec::with_capacity(dets.len());
        for det in dets {
            if kept
                .iter()
                .all(|k| k.iou(&det) <= self.config.iou_threshold)
            {
                kept.push(det);
            }
        }

        kept
    }
}

/// Runs any [`InferenceModel`] as a YOLO-style detector.
pub struct YoloDetector<M: InferenceModel> {
    model: M,
    decoder: YoloDecoder,
    with_crop: bool,
}

impl<M: InferenceModel> YoloDetector<M> {
    pub fn new(model: M, config: YoloDecoderConfig) -> Self {
        Self {
            model,
            decoder: YoloDecoder::new(config),
            with_crop: false,
        }
    }

    /// Feeds the model only the central region matching its aspect ratio instead of stretching the frame.
    pub fn with_crop(mut self, with_crop: bool) -> Self {
        self.with_crop = with_crop;
        self
    }

    fn preprocess(&self, frames: &[Frame]) -> Array4<f32> {
        let (in_w, in_h) = self.model.input_size();
        let mut input = Array4::zeros((frames.len(), 3, in_h as usize, in_w as usize));

        for (b, frame) in frames.iter().enumerate() {
            let resized = if self.with_crop {
                let (fw, fh) = frame.dims();
                let (x, y, w, h) = crop_region(in_w, in_h, fw, fh);
                let region = imageops::crop_imm(
                    &frame.image,
                    x.round() as u32,
                    y.round() as u32,
                    (w.round() as u32).max(1),
                    (h.round() as u32).max(1),
                );
                imageops::resize(&region.to_image(), in_w, in_h, FilterType::Triangle)
            } else {
                imageops::resize(&frame.image, in_w, in_h, FilterType::Triangle)
            };
            for (x, y, px) in resized.enumerate_pixels() {
                for c in 0..3 {
                    input[[b, c, y as usize, x as usize]] = px[c] as f32 / 255.0;
                }
            }
        }

        input
    }
}

impl<M: InferenceModel> Detect for YoloDetector<M> {
    fn detect(&mut self, frames: &[Frame]) -> Result<Vec<Vec<Detection>>, Error> {
        if frames.is_empty() {
            return Ok(Vec::new());
        }

        let input = self.preprocess(frames);
        let (in_w, in_h) = self.model.input_size();
        let first = frames[0].index;
        let predictions = self.model.run(input.view()).map_err(|err| Error::Detector {
            frame: first,
            reason: err.to_string(),
        })?;

        let (fw, fh) = frames[0].dims();
        Ok(self.decoder.decode(
            predictions.view(),
            in_w as usize,
            in_h as usize,
            fw,
            fh,
            self.with_crop,
        ))
    }
}

/// Replays detections recorded as `frame_index:[...]` lines.
#[derive(Debug, Clone, Default)]
pub struct DetectionLog {
    frames: BTreeMap<usize, Vec<Detection>>,
}

impl DetectionLog {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self {
            frames: frames.into_iter().enumerate().collect(),
        }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, Error> {
        let mut frames = BTreeMap::new();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let Some(idx) = line.find(':') else {
                warn!(line = line_no + 1, "wrong detection log format: expected `:`");
                continue;
            };

            let (index, vector) = line.split_at(idx);
            let index: usize = index.trim().parse().map_err(|_| Error::Detector {
                frame: line_no,
                reason: format!("bad frame index `{}`", index),
            })?;

            let dets: Vec<Detection> = serde_json::from_str(&vector[1..])?;
            frames.insert(index, dets);
        }

        Ok(Self { frames })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);

        for (index, dets) in &self.frames {
            writeln!(out, "{}:{}", index, serde_json::to_string(dets)?)?;
        }

        out.flush()?;
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Detect for DetectionLog {
    fn detect(&mut self, frames: &[Frame]) -> Result<Vec<Vec<Detection>>, Error> {
        Ok(frames
            .iter()
            .map(|f| self.frames.get(&f.index).cloned().unwrap_or_default())
            .collect())
    }
}
