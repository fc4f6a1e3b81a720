//! Per-iteration frame size and frame rate selection.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Frame size used when a size list yields no valid entry.
pub const FALLBACK_FRAME_SIZE: FrameSize = FrameSize {
    width: 960,
    height: 540,
};

/// Output resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for FrameSize {
    type Err = String;

    /// Parse `"<width>x<height>"` (case-insensitive separator).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let (w, h) = lower
            .split_once('x')
            .ok_or_else(|| format!("Frame size '{s}' must look like 960x540"))?;
        let width = w
            .trim()
            .parse()
            .map_err(|_| format!("Invalid width in frame size '{s}'"))?;
        let height = h
            .trim()
            .parse()
            .map_err(|_| format!("Invalid height in frame size '{s}'"))?;
        Ok(Self { width, height })
    }
}

/// Parse a comma-separated size list such as `"960x540,1280x720"`.
///
/// Malformed entries are skipped. An empty result falls back to
/// [`FALLBACK_FRAME_SIZE`].
pub fn parse_sizes(list: &str) -> Vec<FrameSize> {
    let sizes: Vec<FrameSize> = list
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| match part.parse() {
            Ok(size) => Some(size),
            Err(e) => {
                tracing::warn!(entry = part, error = %e, "Skipping malformed frame size");
                None
            }
        })
        .collect();

    if sizes.is_empty() {
        vec![FALLBACK_FRAME_SIZE]
    } else {
        sizes
    }
}

/// Chooses the frame size and frame rate for each iteration.
#[derive(Debug, Clone)]
pub struct FrameSelector {
    sizes: Vec<FrameSize>,
    randomize_sizes: bool,
    fps: u32,
    /// Inclusive `(min, max)`; overrides `fps` when set.
    fps_range: Option<(u32, u32)>,
}

impl FrameSelector {
    pub fn new(
        sizes: Vec<FrameSize>,
        randomize_sizes: bool,
        fps: u32,
        fps_range: Option<(u32, u32)>,
    ) -> Self {
        let sizes = if sizes.is_empty() {
            vec![FALLBACK_FRAME_SIZE]
        } else {
            sizes
        };
        // Tolerate a reversed range.
        let fps_range = fps_range.map(|(a, b)| (a.min(b), a.max(b)));
        Self {
            sizes,
            randomize_sizes,
            fps,
            fps_range,
        }
    }

    /// Size for iteration `index`: cyclic, or uniform over the list.
    pub fn size(&self, index: usize) -> FrameSize {
        if self.randomize_sizes {
            let pick = rand::rng().random_range(0..self.sizes.len());
            self.sizes[pick]
        } else {
            self.sizes[index % self.sizes.len()]
        }
    }

    /// A random frame rate within the configured range, if one is set.
    pub fn random_fps(&self) -> Option<u32> {
        self.fps_range
            .map(|(min, max)| rand::rng().random_range(min..=max))
    }

    /// The fixed frame rate used when no range is configured.
    pub fn fixed_fps(&self) -> u32 {
        self.fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- parsing --

    #[test]
    fn parses_default_size_list() {
        let sizes = parse_sizes("960x540,1280x720,768x432");
        assert_eq!(
            sizes,
            vec![
                FrameSize { width: 960, height: 540 },
                FrameSize { width: 1280, height: 720 },
                FrameSize { width: 768, height: 432 },
            ]
        );
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let sizes = parse_sizes(" 640X360 , banana, 12x, ,1024x576");
        assert_eq!(
            sizes,
            vec![
                FrameSize { width: 640, height: 360 },
                FrameSize { width: 1024, height: 576 },
            ]
        );
    }

    #[test]
    fn empty_list_falls_back_to_960x540() {
        assert_eq!(parse_sizes(""), vec![FALLBACK_FRAME_SIZE]);
        assert_eq!(parse_sizes("nonsense"), vec![FALLBACK_FRAME_SIZE]);
    }

    #[test]
    fn frame_size_displays_as_wxh() {
        assert_eq!(FrameSize { width: 1280, height: 720 }.to_string(), "1280x720");
    }

    // -- selection --

    #[test]
    fn sizes_cycle_by_index() {
        let selector = FrameSelector::new(parse_sizes("1x1,2x2,3x3"), false, 20, None);
        let widths: Vec<u32> = (0..5).map(|i| selector.size(i).width).collect();
        assert_eq!(widths, vec![1, 2, 3, 1, 2]);
    }

    #[test]
    fn random_sizes_come_from_the_list() {
        let sizes = parse_sizes("1x1,2x2,3x3");
        let selector = FrameSelector::new(sizes.clone(), true, 20, None);
        for i in 0..50 {
            assert!(sizes.contains(&selector.size(i)));
        }
    }

    #[test]
    fn random_fps_stays_within_inclusive_range() {
        let selector = FrameSelector::new(vec![], false, 20, Some((35, 20)));
        for _ in 0..100 {
            let fps = selector.random_fps().unwrap();
            assert!((20..=35).contains(&fps));
        }
    }

    #[test]
    fn fixed_fps_without_range() {
        let selector = FrameSelector::new(vec![], false, 24, None);
        assert_eq!(selector.random_fps(), None);
        assert_eq!(selector.fixed_fps(), 24);
        assert_eq!(selector.size(7), FALLBACK_FRAME_SIZE);
    }
}
