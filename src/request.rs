//! Incoming request representation.

use uuid::Uuid;

/// Input modality of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Text,
    Image,
}

/// A single user question submitted to the orchestrator.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: Uuid,
    pub modality: Modality,
    /// The question text. For image requests this is an optional caption or
    /// hint supplied alongside the image; it may be empty.
    pub raw_content: String,
    /// Raw image bytes for image requests.
    pub image_bytes: Option<Vec<u8>>,
}

impl Request {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            modality: Modality::Text,
            raw_content: content.into(),
            image_bytes: None,
        }
    }

    pub fn image(image_bytes: Vec<u8>, caption: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            modality: Modality::Image,
            raw_content: caption.into(),
            image_bytes: Some(image_bytes),
        }
    }
}
