//! Caption vocabulary. Turns a photo caption into a command.
//!
//! Captions are normalised before matching: everything outside
//! `[A-Za-z0-9 ]` is dropped, whitespace runs collapse to one space, and
//! the result is trimmed and lower-cased. `"Salt_n_Pepper!"` therefore
//! normalises to `"saltnpepper"`.

use std::sync::LazyLock;

use regex::Regex;

static DISALLOWED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9 ]").unwrap());

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" {2,}").unwrap());

/// Keywords that request object detection instead of a filter.
const DETECTION_KEYWORDS: &[&str] = &["yolo", "detect"];

/// A pixel filter the relay can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Blur,
    Rotate,
    SaltAndPepper,
    Contour,
    Segment,
    /// Multi-photo only: joins every photo of a group.
    Concat,
}

impl Filter {
    /// Look up a normalised caption.
    pub fn from_normalized(caption: &str) -> Option<Self> {
        match caption {
            "blur" => Some(Self::Blur),
            "rotate" => Some(Self::Rotate),
            "salt and pepper" | "saltnpepper" => Some(Self::SaltAndPepper),
            "contour" => Some(Self::Contour),
            "segment" => Some(Self::Segment),
            "concat" => Some(Self::Concat),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Blur => "blur",
            Self::Rotate => "rotate",
            Self::SaltAndPepper => "salt and pepper",
            Self::Contour => "contour",
            Self::Segment => "segment",
            Self::Concat => "concat",
        }
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What a caption asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptionCommand {
    /// No usable caption.
    Empty,
    /// Forward to the detection service.
    Detect,
    /// Apply a known filter.
    Filter(Filter),
    /// Anything else; carries the normalised text.
    Unknown(String),
}

impl CaptionCommand {
    pub fn parse(raw: Option<&str>) -> Self {
        let normalized = normalize_caption(raw.unwrap_or_default());
        if normalized.is_empty() {
            return Self::Empty;
        }
        if DETECTION_KEYWORDS.contains(&normalized.as_str()) {
            return Self::Detect;
        }
        match Filter::from_normalized(&normalized) {
            Some(filter) => Self::Filter(filter),
            None => Self::Unknown(normalized),
        }
    }
}

/// Normalise a caption for matching.
pub fn normalize_caption(raw: &str) -> String {
    let ascii = DISALLOWED.replace_all(raw, "");
    WHITESPACE
        .replace_all(ascii.trim(), " ")
        .to_lowercase()
}
