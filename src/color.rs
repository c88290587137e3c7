use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const WHITE_HEX: &str = "#FFFFFF";

/// Color words the query language recognizes without a `COLOUR=` prefix.
pub const COMMON_COLOURS: &[&str] = &[
    "RED", "YELLOW", "GREEN", "BLUE", "BLACK", "ORANGE", "PINK", "BROWN", "GRAY",
];

lazy_static! {
    static ref HEX_COLOR: Regex = Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("valid hex color regex");
}

/// A color as handed to the renderer: either a color word or `#RRGGBB`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(String);

impl Color {
    pub fn new(text: &str) -> Self {
        Self(text.trim().to_string())
    }

    pub fn white() -> Self {
        Self(WHITE_HEX.to_string())
    }

    pub fn from_rgb(red: u8, green: u8, blue: u8) -> Self {
        Self(format!("#{red:02X}{green:02X}{blue:02X}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_white(&self) -> bool {
        self.0.eq_ignore_ascii_case("white")
            || self.0.eq_ignore_ascii_case(WHITE_HEX)
            || self.0.eq_ignore_ascii_case("#FFF")
    }

    /// Recognizes a bare color word from [`COMMON_COLOURS`] or a `#RRGGBB` literal.
    pub fn parse_token(text: &str) -> Option<Self> {
        let text = text.trim();
        if is_hex_color(text) {
            return Some(Self::new(text));
        }
        let upper = text.to_ascii_uppercase();
        if COMMON_COLOURS.contains(&upper.as_str()) {
            Some(Self(text.to_ascii_lowercase()))
        } else {
            None
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::white()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn is_hex_color(text: &str) -> bool {
    HEX_COLOR.is_match(text)
}
