//! Packing of the per-token attributes into a single `u32`.
//!
//! ```text
//!     3322 2222 2222 1111 1111 1100 0000 0000
//!     1098 7654 3210 9876 5432 1098 7654 3210
//!     ---- ---- ---- ---- ---- ---- ---- ----
//!     bbbb bbbb ffff ffff fFFF FBTT LLLL LLLL
//! ```
//!
//! - L = language id (8 bits)
//! - T = standard token type (2 bits)
//! - B = contains balanced brackets (1 bit)
//! - F = font style (4 bits)
//! - f = foreground color id (9 bits)
//! - b = background color id (8 bits)

use std::fmt;

use crate::themes::FontStyle;

const LANGUAGE_ID_MASK: u32 = 0b0000_0000_0000_0000_0000_0000_1111_1111;
const TOKEN_TYPE_MASK: u32 = 0b0000_0000_0000_0000_0000_0011_0000_0000;
const BALANCED_BRACKETS_MASK: u32 = 0b0000_0000_0000_0000_0000_0100_0000_0000;
const FONT_STYLE_MASK: u32 = 0b0000_0000_0000_0000_0111_1000_0000_0000;
const FOREGROUND_MASK: u32 = 0b0000_0000_1111_1111_1000_0000_0000_0000;
const BACKGROUND_MASK: u32 = 0b1111_1111_0000_0000_0000_0000_0000_0000;

const LANGUAGE_ID_OFFSET: u32 = 0;
const TOKEN_TYPE_OFFSET: u32 = 8;
const BALANCED_BRACKETS_OFFSET: u32 = 10;
const FONT_STYLE_OFFSET: u32 = 11;
const FOREGROUND_OFFSET: u32 = 15;
const BACKGROUND_OFFSET: u32 = 24;

/// The token types editors care about for things like bracket matching or
/// auto-closing pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StandardTokenType {
    #[default]
    Other = 0,
    Comment = 1,
    String = 2,
    RegEx = 3,
}

impl StandardTokenType {
    fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            1 => StandardTokenType::Comment,
            2 => StandardTokenType::String,
            3 => StandardTokenType::RegEx,
            _ => StandardTokenType::Other,
        }
    }
}

/// Language id, token type, bracket flag, font style and color ids of a token.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EncodedTokenAttributes(pub u32);

impl EncodedTokenAttributes {
    pub fn language_id(self) -> u8 {
        ((self.0 & LANGUAGE_ID_MASK) >> LANGUAGE_ID_OFFSET) as u8
    }

    pub fn token_type(self) -> StandardTokenType {
        StandardTokenType::from_bits((self.0 & TOKEN_TYPE_MASK) >> TOKEN_TYPE_OFFSET)
    }

    pub fn contains_balanced_brackets(self) -> bool {
        self.0 & BALANCED_BRACKETS_MASK != 0
    }

    pub fn font_style(self) -> FontStyle {
        FontStyle::from_bits(((self.0 & FONT_STYLE_MASK) >> FONT_STYLE_OFFSET) as u8)
    }

    /// Index of the foreground color in the theme color map
    pub fn foreground(self) -> u32 {
        (self.0 & FOREGROUND_MASK) >> FOREGROUND_OFFSET
    }

    /// Index of the background color in the theme color map
    pub fn background(self) -> u32 {
        (self.0 & BACKGROUND_MASK) >> BACKGROUND_OFFSET
    }

    /// Returns a copy with the given fields overwritten.
    ///
    /// Unset values (`0` for the language id and colors, `None` for the others) leave the
    /// existing field untouched: attributes are merged while descending the scope stack,
    /// they are never cleared.
    #[must_use]
    pub fn set(
        self,
        language_id: u8,
        token_type: Option<StandardTokenType>,
        balanced_brackets: Option<bool>,
        font_style: Option<FontStyle>,
        foreground: u32,
        background: u32,
    ) -> Self {
        let mut language_id_bits = u32::from(self.language_id());
        let mut token_type_bits = self.token_type() as u32;
        let mut balanced_bits = u32::from(self.contains_balanced_brackets());
        let mut font_style_bits = u32::from(self.font_style().bits());
        let mut foreground_bits = self.foreground();
        let mut background_bits = self.background();

        if language_id != 0 {
            language_id_bits = u32::from(language_id);
        }
        if let Some(token_type) = token_type {
            token_type_bits = token_type as u32;
        }
        if let Some(balanced) = balanced_brackets {
            balanced_bits = u32::from(balanced);
        }
        if let Some(font_style) = font_style {
            font_style_bits = u32::from(font_style.bits());
        }
        if foreground != 0 {
            foreground_bits = foreground;
        }
        if background != 0 {
            background_bits = background;
        }

        Self(
            ((language_id_bits << LANGUAGE_ID_OFFSET) & LANGUAGE_ID_MASK)
                | ((token_type_bits << TOKEN_TYPE_OFFSET) & TOKEN_TYPE_MASK)
                | ((balanced_bits << BALANCED_BRACKETS_OFFSET) & BALANCED_BRACKETS_MASK)
                | ((font_style_bits << FONT_STYLE_OFFSET) & FONT_STYLE_MASK)
                | ((foreground_bits << FOREGROUND_OFFSET) & FOREGROUND_MASK)
                | ((background_bits << BACKGROUND_OFFSET) & BACKGROUND_MASK),
        )
    }
}

impl fmt::Debug for EncodedTokenAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedTokenAttributes")
            .field("language_id", &self.language_id())
            .field("token_type", &self.token_type())
            .field("balanced_brackets", &self.contains_balanced_brackets())
            .field("font_style", &self.font_style())
            .field("foreground", &self.foreground())
            .field("background", &self.background())
            .finish()
    }
}

impl fmt::Binary for EncodedTokenAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032b}", self.0)
    }
}
