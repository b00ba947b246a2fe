mod color;
mod compiled;
mod font_style;
mod raw;

pub use color::ColorMap;
pub use compiled::{StyleAttributes, Theme};
pub use font_style::FontStyle;
pub use raw::{RawScope, RawStyleSettings, RawTheme, RawThemeSetting};
