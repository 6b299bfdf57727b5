pub mod rate;
pub mod selftest;

use lensrate_core::ImageTypeWindow;

/// Parse `THRESHOLD[:IMAGES]`; images default to one.
pub fn parse_requirement(s: &str) -> Result<(f64, usize), String> {
    let (threshold, images) = match s.split_once(':') {
        Some((t, n)) => (t, n),
        None => (s, "1"),
    };
    let threshold: f64 = threshold
        .trim()
        .parse()
        .map_err(|e| format!("invalid threshold '{threshold}': {e}"))?;
    let images: usize = images
        .trim()
        .parse()
        .map_err(|e| format!("invalid image count '{images}': {e}"))?;
    if images == 0 {
        return Err("image count must be at least 1".to_string());
    }
    Ok((threshold, images))
}

/// Parse an image-type window string into the enum.
pub fn parse_window(s: &str) -> ImageTypeWindow {
    match s {
        "any" => ImageTypeWindow::Any,
        "type_i" | "i" => ImageTypeWindow::TypeI,
        "type_ii" | "ii" => ImageTypeWindow::TypeII,
        _ => {
            eprintln!("Unknown image window '{s}', using any");
            ImageTypeWindow::Any
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requirement_default_images() {
        assert_eq!(parse_requirement("8").unwrap(), (8.0, 1));
        assert_eq!(parse_requirement("6.5:2").unwrap(), (6.5, 2));
    }

    #[test]
    fn test_parse_requirement_rejects_garbage() {
        assert!(parse_requirement("eight").is_err());
        assert!(parse_requirement("8:x").is_err());
        assert!(parse_requirement("8:0").is_err());
    }

    #[test]
    fn test_parse_window() {
        assert_eq!(parse_window("type_i"), ImageTypeWindow::TypeI);
        assert_eq!(parse_window("type_ii"), ImageTypeWindow::TypeII);
        assert_eq!(parse_window("bogus"), ImageTypeWindow::Any);
    }
}
