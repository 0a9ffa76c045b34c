use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Inference failed: {0}")]
    Ort(#[from] ort::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("No text region survived filtering")]
    NoTextDetected,

    #[error("No document quadrilateral found")]
    NoDocumentFound,

    #[error("Unexpected model output: {0}")]
    UnexpectedOutput(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),
}

pub type Result<T> = std::result::Result<T, Error>;
