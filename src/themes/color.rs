use std::collections::HashMap;

use crate::error::{Error, OcraResult};

/// Only `#rgb`, `#rgba`, `#rrggbb` and `#rrggbbaa` are accepted in themes
pub(crate) fn is_valid_hex_color(value: &str) -> bool {
    let Some(hex) = value.strip_prefix('#') else {
        return false;
    };
    matches!(hex.len(), 3 | 4 | 6 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit())
}

/// Assigns a small integer id to each color used by a theme.
///
/// Id 0 means "no color" in packed token attributes, so the first color gets id 1.
/// Colors are stored uppercased.
#[derive(Debug, Clone, Default)]
pub struct ColorMap {
    /// Ids are fixed by the caller and unknown colors are an error
    is_frozen: bool,
    last_color_id: u32,
    id_to_color: Vec<String>,
    color_to_id: HashMap<String, u32>,
}

impl ColorMap {
    pub fn new() -> Self {
        Self {
            id_to_color: vec![String::new()],
            ..Default::default()
        }
    }

    /// A color map whose ids are the indices in `colors`
    pub fn frozen<S: AsRef<str>>(colors: &[S]) -> Self {
        let mut color_map = Self {
            is_frozen: true,
            ..Default::default()
        };
        for (i, color) in colors.iter().enumerate() {
            let color = color.as_ref().to_uppercase();
            color_map.color_to_id.insert(color.clone(), i as u32);
            color_map.id_to_color.push(color);
        }
        color_map
    }

    /// Returns the id of the color, allocating one if needed.
    /// `None` is always id 0.
    pub fn get_id(&mut self, color: Option<&str>) -> OcraResult<u32> {
        let Some(color) = color else {
            return Ok(0);
        };
        let color = color.to_uppercase();
        if let Some(&id) = self.color_to_id.get(&color)
            && id != 0
        {
            return Ok(id);
        }

        if self.is_frozen {
            return Err(Error::MissingColor { color });
        }
        Ok(self.allocate(color))
    }

    /// Allocates a new id without checking whether the map is frozen or the color known
    pub(crate) fn allocate(&mut self, color: String) -> u32 {
        self.last_color_id += 1;
        self.color_to_id.insert(color.clone(), self.last_color_id);
        self.id_to_color.push(color);
        self.last_color_id
    }

    /// All the colors, indexed by id
    pub fn colors(&self) -> &[String] {
        &self.id_to_color
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_hex_colors() {
        let test_cases = vec![
            ("#fff", true),
            ("#FFFA", true),
            ("#a1b2c3", true),
            ("#a1b2c3d4", true),
            ("#a1b2c", false),
            ("a1b2c3", false),
            ("#ggg", false),
            ("white", false),
            ("", false),
        ];

        for (input, expected) in test_cases {
            assert_eq!(is_valid_hex_color(input), expected, "checking {input:?}");
        }
    }

    #[test]
    fn test_ids_are_allocated_once_per_color() {
        let mut color_map = ColorMap::new();
        assert_eq!(color_map.get_id(None).unwrap(), 0);
        assert_eq!(color_map.get_id(Some("#ff0000")).unwrap(), 1);
        assert_eq!(color_map.get_id(Some("#00ff00")).unwrap(), 2);
        assert_eq!(color_map.get_id(Some("#FF0000")).unwrap(), 1);
        assert_eq!(color_map.colors(), &["", "#FF0000", "#00FF00"]);
    }

    #[test]
    fn test_frozen_color_map_rejects_unknown_colors() {
        let mut color_map = ColorMap::frozen(&["", "#ffffff", "#000000"]);
        assert_eq!(color_map.get_id(Some("#000000")).unwrap(), 2);
        assert!(matches!(
            color_map.get_id(Some("#123456")),
            Err(Error::MissingColor { color }) if color == "#123456"
        ));
    }
}
