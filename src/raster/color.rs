//! Color string parsing.
//!
//! Accepts `rgb(r,g,b)`, `rgba(r,g,b,a)` with alpha in `0.0..=1.0`
//! scaled to 0–255, hex notations, and a set of common color names.
//! Unmatched strings paint as opaque black, the painter's behavior for
//! an invalid color.

use tiny_skia::Color;

/// Parses a fill/stroke style string into a color.
pub fn parse_color(s: &str) -> Color {
    let s = s.trim();
    if let Some(c) = parse_rgb_func(s) {
        return c;
    }
    if let Some(c) = parse_hex(s) {
        return c;
    }
    if let Some(c) = named_color(s) {
        return c;
    }
    log::debug!("unparsable color string {s:?}, using black");
    Color::BLACK
}

fn parse_rgb_func(s: &str) -> Option<Color> {
    let (with_alpha, inner) = if let Some(rest) = s.strip_prefix("rgba(") {
        (true, rest.strip_suffix(')')?)
    } else if let Some(rest) = s.strip_prefix("rgb(") {
        (false, rest.strip_suffix(')')?)
    } else {
        return None;
    };

    let mut parts = inner.split(',').map(str::trim);
    let r: u8 = parts.next()?.parse().ok()?;
    let g: u8 = parts.next()?.parse().ok()?;
    let b: u8 = parts.next()?.parse().ok()?;
    let a: u8 = if with_alpha {
        let alpha: f32 = parts.next()?.parse().ok()?;
        (alpha.clamp(0.0, 1.0) * 255.0) as u8
    } else {
        255
    };
    if parts.next().is_some() {
        return None;
    }
    Some(Color::from_rgba8(r, g, b, a))
}

fn parse_hex(s: &str) -> Option<Color> {
    let digits = s.strip_prefix('#')?;
    let value = u32::from_str_radix(digits, 16).ok()?;
    match digits.len() {
        // #rgb
        3 => {
            let r = ((value >> 8) & 0xF) as u8;
            let g = ((value >> 4) & 0xF) as u8;
            let b = (value & 0xF) as u8;
            Some(Color::from_rgba8(r * 17, g * 17, b * 17, 255))
        }
        // #rrggbb
        6 => Some(Color::from_rgba8(
            (value >> 16) as u8,
            (value >> 8) as u8,
            value as u8,
            255,
        )),
        // #aarrggbb
        8 => Some(Color::from_rgba8(
            (value >> 16) as u8,
            (value >> 8) as u8,
            value as u8,
            (value >> 24) as u8,
        )),
        _ => None,
    }
}

fn named_color(s: &str) -> Option<Color> {
    let rgba = match s.to_ascii_lowercase().as_str() {
        "transparent" => (0, 0, 0, 0),
        "black" => (0, 0, 0, 255),
        "white" => (255, 255, 255, 255),
        "red" => (255, 0, 0, 255),
        "lime" => (0, 255, 0, 255),
        "green" => (0, 128, 0, 255),
        "blue" => (0, 0, 255, 255),
        "yellow" => (255, 255, 0, 255),
        "cyan" | "aqua" => (0, 255, 255, 255),
        "magenta" | "fuchsia" => (255, 0, 255, 255),
        "gray" | "grey" => (128, 128, 128, 255),
        "darkgray" | "darkgrey" => (169, 169, 169, 255),
        "lightgray" | "lightgrey" => (211, 211, 211, 255),
        "silver" => (192, 192, 192, 255),
        "maroon" => (128, 0, 0, 255),
        "olive" => (128, 128, 0, 255),
        "navy" => (0, 0, 128, 255),
        "teal" => (0, 128, 128, 255),
        "purple" => (128, 0, 128, 255),
        "orange" => (255, 165, 0, 255),
        "brown" => (165, 42, 42, 255),
        _ => return None,
    };
    Some(Color::from_rgba8(rgba.0, rgba.1, rgba.2, rgba.3))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba8(c: Color) -> (u8, u8, u8, u8) {
        (
            (c.red() * 255.0 + 0.5) as u8,
            (c.green() * 255.0 + 0.5) as u8,
            (c.blue() * 255.0 + 0.5) as u8,
            (c.alpha() * 255.0 + 0.5) as u8,
        )
    }

    #[test]
    fn rgb_function() {
        assert_eq!(rgba8(parse_color("rgb(255, 0, 0)")), (255, 0, 0, 255));
        assert_eq!(rgba8(parse_color("rgb(1,2,3)")), (1, 2, 3, 255));
    }

    #[test]
    fn rgba_alpha_is_unit_scaled() {
        let c = parse_color("rgba(0, 0, 0, 0.5)");
        assert_eq!(rgba8(c).3, 127);
        let opaque = parse_color("rgba(10, 20, 30, 1.0)");
        assert_eq!(rgba8(opaque), (10, 20, 30, 255));
    }

    #[test]
    fn hex_forms() {
        assert_eq!(rgba8(parse_color("#ff0000")), (255, 0, 0, 255));
        assert_eq!(rgba8(parse_color("#0f0")), (0, 255, 0, 255));
        assert_eq!(rgba8(parse_color("#80ff0000")).3, 128);
    }

    #[test]
    fn named_and_unknown() {
        assert_eq!(rgba8(parse_color("white")), (255, 255, 255, 255));
        assert_eq!(rgba8(parse_color("Transparent")).3, 0);
        // unmatched forms paint as opaque black
        assert_eq!(rgba8(parse_color("no-such-color")), (0, 0, 0, 255));
    }

    #[test]
    fn malformed_rgb_falls_through_to_black() {
        assert_eq!(rgba8(parse_color("rgb(300,0,0)")), (0, 0, 0, 255));
        assert_eq!(rgba8(parse_color("rgb(1,2)")), (0, 0, 0, 255));
    }
}
