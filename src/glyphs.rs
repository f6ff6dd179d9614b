//! 3×5 bitmap font for overlay labels.
//!
//! Covers digits, the letters used by score and expression labels, and a few
//! punctuation marks. Text is rendered upper-case; unknown characters are blank.

use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

const GLYPH_W: i32 = 3;
const GLYPH_H: i32 = 5;

fn glyph(ch: char) -> [u8; 5] {
    match ch.to_ascii_uppercase() {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'C' => [0b011, 0b100, 0b100, 0b100, 0b011],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'G' => [0b011, 0b100, 0b101, 0b101, 0b011],
        'H' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'M' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'N' => [0b110, 0b101, 0b101, 0b101, 0b101],
        'O' => [0b010, 0b101, 0b101, 0b101, 0b010],
        'P' => [0b110, 0b101, 0b110, 0b100, 0b100],
        'R' => [0b110, 0b101, 0b110, 0b101, 0b101],
        'S' => [0b011, 0b100, 0b010, 0b001, 0b110],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'U' => [0b101, 0b101, 0b101, 0b101, 0b111],
        '(' => [0b001, 0b010, 0b010, 0b010, 0b001],
        ')' => [0b100, 0b010, 0b010, 0b010, 0b100],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        _ => [0; 5],
    }
}

/// Horizontal advance of one character, including spacing.
pub fn advance(scale: u32) -> i32 {
    (GLYPH_W + 1) * scale as i32
}

/// Height of one text line, including spacing.
pub fn line_height(scale: u32) -> i32 {
    (GLYPH_H + 2) * scale as i32
}

pub fn text_width(text: &str, scale: u32) -> i32 {
    text.chars().count() as i32 * advance(scale)
}

/// Draw `text` with its top-left corner at `(x, y)`. Pixels outside the image are clipped.
pub fn draw_text(img: &mut RgbaImage, x: i32, y: i32, text: &str, scale: u32, color: Rgba<u8>) {
    let s = scale as i32;
    for (i, ch) in text.chars().enumerate() {
        let left = x + i as i32 * advance(scale);
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_W {
                if (bits >> (GLYPH_W - 1 - col)) & 1 == 1 {
                    let cell = Rect::at(left + col * s, y + row as i32 * s).of_size(scale, scale);
                    draw_filled_rect_mut(img, cell, color);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    #[test]
    fn test_every_label_character_has_a_glyph() {
        for label in [
            "neutral", "happiness", "surprise", "sadness", "anger", "disgust", "fear", "contempt",
            "(0.123456789)",
        ] {
            for ch in label.chars() {
                assert!(glyph(ch) != [0; 5] || ch == ' ', "no glyph for {ch:?}");
            }
        }
    }

    #[test]
    fn test_draw_one() {
        let mut img = RgbaImage::new(8, 8);
        draw_text(&mut img, 0, 0, "1", 1, WHITE);
        // Top row of '1' is 010.
        assert_eq!(img.get_pixel(0, 0)[3], 0);
        assert_eq!(img.get_pixel(1, 0), &WHITE);
        // Bottom row is 111.
        assert_eq!(img.get_pixel(0, 4), &WHITE);
        assert_eq!(img.get_pixel(2, 4), &WHITE);
    }

    #[test]
    fn test_clipped_text_does_not_panic() {
        let mut img = RgbaImage::new(4, 4);
        draw_text(&mut img, -6, 2, "88.8", 2, WHITE);
        draw_text(&mut img, 3, 3, "happiness", 3, WHITE);
    }

    #[test]
    fn test_text_width() {
        assert_eq!(text_width("abc", 2), 24);
        assert_eq!(line_height(1), 7);
    }
}
