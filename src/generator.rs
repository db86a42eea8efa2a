use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::Artifact;

/// Failure of a remote generation call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("generation failed{}: {message}", status_suffix(.status))]
pub struct GenerationError {
    pub status: Option<u16>,
    pub message: String,
}

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

/// The remote image-generation service.
#[async_trait]
pub trait ImageGenerator: Send + Sync + 'static {
    async fn generate(&self, prompt: &str) -> Result<Artifact, GenerationError>;
}

#[async_trait]
impl<G: ImageGenerator + ?Sized> ImageGenerator for Arc<G> {
    async fn generate(&self, prompt: &str) -> Result<Artifact, GenerationError> {
        (**self).generate(prompt).await
    }
}

/// Turns placeholder artifacts into errors.
///
/// Some services answer a failed generation with a fallback image instead of
/// an error. Wrapping them here keeps the driver on a single failure path.
pub struct PlaceholderGuard<G> {
    inner: G,
    marker: String,
}

impl<G: ImageGenerator> PlaceholderGuard<G> {
    pub fn new(inner: G, marker: impl Into<String>) -> Self {
        Self {
            inner,
            marker: marker.into(),
        }
    }
}

#[async_trait]
impl<G: ImageGenerator> ImageGenerator for PlaceholderGuard<G> {
    async fn generate(&self, prompt: &str) -> Result<Artifact, GenerationError> {
        let artifact = self.inner.generate(prompt).await?;

        if artifact.as_str().contains(&self.marker) {
            tracing::debug!(marker = %self.marker, "generator returned a placeholder artifact");
            return Err(GenerationError::new(format!(
                "service returned placeholder artifact ({})",
                self.marker
            )));
        }

        Ok(artifact)
    }
}
