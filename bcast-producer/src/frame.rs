//! Displayable frames and the frame factory seam
//!
//! The producer hands matched video/audio units to a [`FrameFactory`], which
//! turns them into whatever the downstream mixer understands. The result is
//! carried as an opaque, cheaply clonable [`DrawFrame`].

use crate::media::{AudioSamples, VideoPlane};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque displayable frame
///
/// A still frame is a repeat of an already delivered frame; consumers must
/// not play its audio again.
#[derive(Clone, Default)]
pub struct DrawFrame {
    content: Option<Arc<dyn Any + Send + Sync>>,
    still: bool,
}

impl DrawFrame {
    pub fn new<T: Any + Send + Sync>(content: T) -> Self {
        Self {
            content: Some(Arc::new(content)),
            still: false,
        }
    }

    /// Frame with nothing to draw
    pub fn empty() -> Self {
        Self::default()
    }

    /// Audio-muted repeat of this frame
    pub fn still(&self) -> Self {
        Self {
            content: self.content.clone(),
            still: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none()
    }

    pub fn is_still(&self) -> bool {
        self.still
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.content.as_deref().and_then(|c| c.downcast_ref::<T>())
    }

    /// True when both frames draw the same content
    pub fn same_content(&self, other: &DrawFrame) -> bool {
        match (&self.content, &other.content) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for DrawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrawFrame")
            .field("empty", &self.is_empty())
            .field("still", &self.still)
            .finish()
    }
}

/// Synthesizes displayable frames from matched video and audio
pub trait FrameFactory: Send + Sync {
    /// `tag` identifies the producer the frame belongs to
    fn make_frame(
        &self,
        tag: Uuid,
        video: Option<&VideoPlane>,
        audio: Option<&AudioSamples>,
    ) -> DrawFrame;
}

/// Frame content produced by [`PassthroughFactory`]
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedFrame {
    pub tag: Uuid,
    pub video: Option<VideoPlane>,
    pub audio: Option<AudioSamples>,
}

/// Factory that keeps the decoded units as they are
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughFactory;

impl FrameFactory for PassthroughFactory {
    fn make_frame(
        &self,
        tag: Uuid,
        video: Option<&VideoPlane>,
        audio: Option<&AudioSamples>,
    ) -> DrawFrame {
        DrawFrame::new(ComposedFrame {
            tag,
            video: video.cloned(),
            audio: audio.cloned(),
        })
    }
}
