use image::Rgb;

/// Manhattan distance threshold for the exhaustive verification pass.
pub const STRICT_DISTANCE: u32 = 60;

/// Manhattan distance between two pixels over R, G, B.
#[inline]
pub fn color_distance(a: Rgb<u8>, b: Rgb<u8>) -> u32 {
    a.0.iter()
        .zip(b.0.iter())
        .map(|(&x, &y)| x.abs_diff(y) as u32)
        .sum()
}

/// Loose pixel match used while searching. `max_distance` is exclusive.
#[inline]
pub fn loose_match(a: Rgb<u8>, b: Rgb<u8>, max_distance: u32) -> bool {
    color_distance(a, b) < max_distance
}

/// Strict pixel match used for confirmation.
#[inline]
pub fn strict_match(a: Rgb<u8>, b: Rgb<u8>) -> bool {
    color_distance(a, b) < STRICT_DISTANCE
}

/// Teal / green / blue fills used by the accept button.
/// Any one of the three channel-ratio rules is enough.
#[inline]
pub fn is_button_color(p: Rgb<u8>) -> bool {
    let [r, g, b] = p.0.map(i32::from);
    (g > r + 20 && g > b + 10 && g > 100)
        || (b > r + 20 && g > r + 10 && b > 80)
        || (g > 120 && b > 80 && r < 100)
}

/// Bright glyph pixels of the status text on the queue screen.
#[inline]
pub fn is_near_white(p: Rgb<u8>) -> bool {
    p.0.iter().all(|&c| c > 200)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_distance_is_manhattan() {
        assert_eq!(color_distance(Rgb([10, 20, 30]), Rgb([0, 25, 60])), 10 + 5 + 30);
        assert_eq!(color_distance(Rgb([255, 255, 255]), Rgb([0, 0, 0])), 765);
        assert_eq!(color_distance(Rgb([7, 7, 7]), Rgb([7, 7, 7])), 0);
    }

    #[test]
    fn test_loose_match_threshold_is_exclusive() {
        let a = Rgb([100, 100, 100]);
        assert!(loose_match(a, Rgb([149, 100, 100]), 50));
        assert!(!loose_match(a, Rgb([150, 100, 100]), 50));
    }

    #[test]
    fn test_strict_is_tighter_than_loose() {
        let a = Rgb([100, 100, 100]);
        let b = Rgb([130, 130, 100]); // distance 60
        assert!(!strict_match(a, b));
        assert!(loose_match(a, b, 120));
        assert!(strict_match(a, Rgb([120, 120, 110])));
    }

    #[test]
    fn test_button_colors() {
        assert!(is_button_color(Rgb([30, 160, 140]))); // teal
        assert!(is_button_color(Rgb([40, 180, 60]))); // green
        assert!(is_button_color(Rgb([20, 90, 200]))); // blue
        assert!(!is_button_color(Rgb([128, 128, 128])));
        assert!(!is_button_color(Rgb([240, 240, 240])));
        assert!(!is_button_color(Rgb([200, 40, 40])));
    }

    #[test]
    fn test_button_color_does_not_wrap_on_bright_red() {
        // g > r + 20 must not overflow for r near 255
        assert!(!is_button_color(Rgb([250, 110, 90])));
    }

    #[test]
    fn test_near_white() {
        assert!(is_near_white(Rgb([255, 230, 201])));
        assert!(!is_near_white(Rgb([255, 255, 200])));
    }
}
