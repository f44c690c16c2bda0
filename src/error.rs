use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image Error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stub Error: {0}")]
    Stub(#[from] bincode::Error),

    #[error("OpenCV Error: {0}")]
    OpenCv(#[from] opencv::Error),

    #[error("video contains no frames")]
    EmptyVideo,

    #[error("failed to decode frame {index}: {reason}")]
    Decode { index: usize, reason: String },

    #[error("detector failed on frame {frame}: {reason}")]
    Detector { frame: usize, reason: String },

    #[error("homography: {0}")]
    Homography(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Tags an unrecoverable failure with the pipeline stage it came from.
    pub fn in_stage(self, stage: &'static str) -> Self {
        match self {
            err @ Error::Stage { .. } => err,
            err => Error::Stage {
                stage,
                source: Box::new(err),
            },
        }
    }
}
