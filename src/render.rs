//! Reply presentation.
//!
//! By the time anything is rendered the whole answer is already in memory.
//! Incremental mode only paces how fast it is revealed; it has no
//! partial-answer, early-exit, or backpressure semantics and must not be
//! mistaken for transport-level streaming.

use std::time::Duration;

use futures::Stream;
use serde::Deserialize;

use crate::chat::BotReply;

/// How a reply is shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentationMode {
    /// Show the full reply at once.
    Atomic,
    /// Reveal the reply piece by piece with a fixed delay.
    #[default]
    Incremental,
}

/// Unit of incremental reveal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One service fragment at a time.
    #[default]
    Fragment,
    /// One character at a time.
    Character,
}

/// One display update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderFrame {
    /// Text added by this frame.
    pub delta: String,
    /// Everything revealed so far, always a prefix of the full reply.
    pub shown: String,
}

/// Turns a complete reply into display frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseRenderer {
    mode: PresentationMode,
    granularity: Granularity,
    delay: Duration,
}

impl Default for ResponseRenderer {
    fn default() -> Self {
        Self::incremental(Granularity::Fragment, Duration::from_millis(100))
    }
}

impl ResponseRenderer {
    pub fn atomic() -> Self {
        Self {
            mode: PresentationMode::Atomic,
            granularity: Granularity::Fragment,
            delay: Duration::ZERO,
        }
    }

    pub fn incremental(granularity: Granularity, delay: Duration) -> Self {
        Self {
            mode: PresentationMode::Incremental,
            granularity,
            delay,
        }
    }

    pub fn mode(&self) -> PresentationMode {
        self.mode
    }

    /// The frames a reply is shown as, without any pacing.
    pub fn frames(&self, reply: &BotReply) -> Vec<RenderFrame> {
        let pieces: Vec<String> = match (self.mode, self.granularity) {
            (PresentationMode::Atomic, _) => vec![reply.text.clone()],
            (PresentationMode::Incremental, Granularity::Fragment) => reply
                .fragments
                .iter()
                .filter(|f| !f.is_empty())
                .cloned()
                .collect(),
            (PresentationMode::Incremental, Granularity::Character) => {
                reply.text.chars().map(String::from).collect()
            }
        };

        let mut shown = String::with_capacity(reply.text.len());
        pieces
            .into_iter()
            .map(|delta| {
                shown.push_str(&delta);
                RenderFrame {
                    delta,
                    shown: shown.clone(),
                }
            })
            .collect()
    }

    /// Emit the frames, sleeping the configured delay between them.
    pub fn render(&self, reply: &BotReply) -> impl Stream<Item = RenderFrame> + Send + 'static {
        let frames = self.frames(reply);
        let delay = match self.mode {
            PresentationMode::Atomic => Duration::ZERO,
            PresentationMode::Incremental => self.delay,
        };

        async_stream::stream! {
            for (i, frame) in frames.into_iter().enumerate() {
                if i > 0 && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield frame;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn reply(fragments: &[&str]) -> BotReply {
        BotReply {
            text: fragments.concat(),
            fragments: fragments.iter().map(ToString::to_string).collect(),
            citations: Vec::new(),
        }
    }

    #[test]
    fn test_atomic_is_single_full_frame() {
        let frames = ResponseRenderer::atomic().frames(&reply(&["Om ", "Namah ", "Shivaya"]));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].shown, "Om Namah Shivaya");
    }

    #[test]
    fn test_fragment_frames_are_prefixes() {
        let full = "Om Namah Shivaya";
        let renderer = ResponseRenderer::incremental(Granularity::Fragment, Duration::ZERO);
        let frames = renderer.frames(&reply(&["Om ", "Namah ", "Shivaya"]));

        assert_eq!(frames.len(), 3);
        for frame in &frames {
            assert!(full.starts_with(&frame.shown));
        }
        assert_eq!(frames.last().unwrap().shown, full);
        let rejoined: String = frames.iter().map(|f| f.delta.as_str()).collect();
        assert_eq!(rejoined, full);
    }

    #[test]
    fn test_character_frames_handle_multibyte_text() {
        let renderer = ResponseRenderer::incremental(Granularity::Character, Duration::ZERO);
        let frames = renderer.frames(&reply(&["हरे ", "कृष्ण"]));
        let full = "हरे कृष्ण";
        assert_eq!(frames.len(), full.chars().count());
        assert!(frames.iter().all(|f| full.starts_with(&f.shown)));
        assert_eq!(frames.last().unwrap().shown, full);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incremental_render_paces_frames() {
        let renderer =
            ResponseRenderer::incremental(Granularity::Fragment, Duration::from_millis(100));
        let started = tokio::time::Instant::now();
        let frames: Vec<_> = renderer
            .render(&reply(&["Om ", "Namah ", "Shivaya"]))
            .collect()
            .await;

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].shown, "Om Namah Shivaya");
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_atomic_render_does_not_wait() {
        let started = tokio::time::Instant::now();
        let frames: Vec<_> = ResponseRenderer::atomic()
            .render(&reply(&["a", "b"]))
            .collect()
            .await;
        assert_eq!(frames.len(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
