//! SDF text layout.
//!
//! Layout works in SDF design units (`font_size / font.info.size` converts to
//! element pixels) and emits glyph quads as 4 vertices x 4 floats: position
//! x/y and atlas u/v. Only the lines inside the requested render window are
//! emitted; the line cache records `{codepoint_index, max_y, max_x}` per
//! logical line so a later layout can resume from the first line overlapping
//! a new window instead of re-tokenizing from the start of the text.

use crate::text::{Contain, SdfFontFace, SdfGlyph, TextAlign, TextProps, VerticalAlign, WordBreak};

const ZERO_WIDTH_SPACE: char = '\u{200B}';

/// Cached facts about one laid-out logical line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineEntry {
    /// Index of the line's first codepoint in the source text.
    pub codepoint_index: usize,
    /// Bottom edge of the line in design units (including `offset_y`).
    pub max_y: f32,
    /// Advance width of the line in design units.
    pub max_x: f32,
}

/// The inclusive-exclusive line range that must exist in the vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderWindow {
    pub first_line: usize,
    pub last_line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutResult {
    pub buffer_num_floats: usize,
    pub buffer_num_quads: u32,
    /// Widest laid-out line, in element pixels.
    pub max_x: f32,
    /// Lines known so far; the total once `fully_processed`.
    pub num_lines: usize,
    /// Whether layout reached the end of the text (or the truncation point).
    pub fully_processed: bool,
}

pub(crate) struct LayoutRequest<'a> {
    pub font: &'a SdfFontFace,
    pub props: &'a TextProps,
    pub window: RenderWindow,
}

#[derive(Debug, Clone, Copy)]
struct PlacedGlyph {
    /// Left edge relative to the line start (xoffset applied).
    x: f32,
    /// Pen position after this glyph, used by suffix truncation.
    pen_after: f32,
    glyph: SdfGlyph,
}

struct LineScan {
    glyphs: Vec<PlacedGlyph>,
    /// Start of the next line.
    next_idx: usize,
    /// Advance width, excluding a trailing break.
    width: f32,
}

pub(crate) fn layout(
    request: &LayoutRequest<'_>,
    line_cache: &mut Vec<LineEntry>,
    out: &mut Vec<f32>,
) -> LayoutResult {
    let font = request.font;
    let props = request.props;
    let window = request.window;
    out.clear();

    let ratio = props.font_size / font.info.size;
    let chars: Vec<char> = props.text.chars().collect();
    if chars.is_empty() {
        return LayoutResult {
            buffer_num_floats: 0,
            buffer_num_quads: 0,
            max_x: 0.0,
            num_lines: 0,
            fully_processed: true,
        };
    }

    let line_height_px = props
        .line_height
        .unwrap_or_else(|| font.default_line_height(props.font_size));
    let line_height = line_height_px / ratio;
    let offset_y = props.offset_y / ratio;
    let letter_spacing = props.letter_spacing / ratio;
    let wrap = props.contain != Contain::None && props.width > 0.0;
    let avail = if wrap {
        props.width / ratio
    } else {
        f32::INFINITY
    };
    let max_lines = effective_max_lines(props, line_height_px);

    // Resume from the first cached line overlapping the window, or from the
    // deepest cached line when the window starts beyond the cache.
    let (mut line, mut idx) = if line_cache.is_empty() {
        (0, 0)
    } else {
        let resume = window.first_line.min(line_cache.len() - 1);
        (resume, line_cache[resume].codepoint_index)
    };

    let mut max_x_design = line_cache
        .iter()
        .map(|entry| entry.max_x)
        .fold(0.0_f32, f32::max);
    let mut truncated = false;
    let mut quads_before_valign = 0usize;

    while line < window.last_line && idx < chars.len() {
        let scan = scan_line(font, &chars, idx, avail, letter_spacing, props.word_break);
        let more_after = scan.next_idx < chars.len();
        let last_allowed = line + 1 == max_lines;

        let (glyphs, width) = if last_allowed && more_after && !props.overflow_suffix.is_empty() {
            truncate_with_suffix(font, props, scan.glyphs, scan.width, avail, letter_spacing)
        } else {
            (scan.glyphs, scan.width)
        };

        let entry = LineEntry {
            codepoint_index: idx,
            max_y: (line as f32 + 1.0) * line_height + offset_y,
            max_x: width,
        };
        if line < line_cache.len() {
            line_cache[line] = entry;
        } else {
            line_cache.push(entry);
        }
        max_x_design = max_x_design.max(width);

        if line >= window.first_line {
            let shift = if avail.is_finite() {
                match props.text_align {
                    TextAlign::Left => 0.0,
                    TextAlign::Center => (avail - width) / 2.0,
                    TextAlign::Right => avail - width,
                }
            } else {
                0.0
            };
            let line_top = line as f32 * line_height + offset_y;
            for placed in &glyphs {
                let glyph = &placed.glyph;
                if glyph.width <= 0.0 || glyph.height <= 0.0 {
                    continue;
                }
                emit_quad(out, shift + placed.x, line_top + glyph.yoffset, glyph);
                quads_before_valign += 1;
            }
        }

        idx = scan.next_idx;
        line += 1;

        if last_allowed && more_after {
            truncated = true;
            break;
        }
    }

    let fully_processed = truncated || idx >= chars.len();
    let num_lines = line_cache.len().max(line);

    // Vertical alignment needs the final line count, so it only applies to
    // bounded, non-scrollable text (which is always fully processed here).
    if props.contain == Contain::Both
        && !props.scrollable
        && fully_processed
        && props.vertical_align != VerticalAlign::Top
        && props.height > 0.0
    {
        let used = num_lines as f32 * line_height;
        let height_design = props.height / ratio;
        let dy = match props.vertical_align {
            VerticalAlign::Top => 0.0,
            VerticalAlign::Middle => (height_design - used) / 2.0,
            VerticalAlign::Bottom => height_design - used,
        };
        if dy != 0.0 {
            for vertex in out.chunks_exact_mut(4) {
                vertex[1] += dy;
            }
        }
    }

    LayoutResult {
        buffer_num_floats: out.len(),
        buffer_num_quads: quads_before_valign as u32,
        max_x: max_x_design * ratio,
        num_lines,
        fully_processed,
    }
}

fn effective_max_lines(props: &TextProps, line_height_px: f32) -> usize {
    let mut max_lines = if props.max_lines == 0 {
        usize::MAX
    } else {
        props.max_lines as usize
    };
    if props.contain == Contain::Both && !props.scrollable && props.height > 0.0 {
        let bound = (props.height / line_height_px).floor().max(1.0) as usize;
        max_lines = max_lines.min(bound);
    }
    max_lines
}

/// Scans one logical line starting at `start`, applying kerning, letter
/// spacing, and the word-break policy against `avail` design units.
fn scan_line(
    font: &SdfFontFace,
    chars: &[char],
    start: usize,
    avail: f32,
    letter_spacing: f32,
    word_break: WordBreak,
) -> LineScan {
    let mut glyphs: Vec<PlacedGlyph> = Vec::new();
    let mut pen = 0.0_f32;
    let mut prev: Option<char> = None;
    // Break opportunity: (codepoint index of the break char, glyph count at
    // the break, pen width before the break char).
    let mut last_break: Option<(usize, usize, f32)> = None;
    let mut index = start;

    while index < chars.len() {
        let character = chars[index];
        if character == '\n' {
            return LineScan {
                glyphs,
                next_idx: index + 1,
                width: pen,
            };
        }
        if character == ZERO_WIDTH_SPACE {
            last_break = Some((index, glyphs.len(), pen));
            index += 1;
            continue;
        }
        let Some(glyph) = font.glyph(character) else {
            log::debug!("no glyph for {character:?} in '{}'", font.family);
            index += 1;
            continue;
        };
        let kern = prev.map_or(0.0, |p| font.kerning(p, character));
        let is_whitespace = character == ' ' || character == '\t';

        if avail.is_finite()
            && !is_whitespace
            && !glyphs.is_empty()
            && pen + kern + glyph.width > avail
        {
            match word_break {
                WordBreak::BreakAll => {
                    return LineScan {
                        glyphs,
                        next_idx: index,
                        width: pen,
                    };
                }
                WordBreak::BreakWord => {
                    if let Some((break_idx, glyph_count, width)) = last_break {
                        glyphs.truncate(glyph_count);
                        return LineScan {
                            glyphs,
                            next_idx: break_idx + 1,
                            width,
                        };
                    }
                    return LineScan {
                        glyphs,
                        next_idx: index,
                        width: pen,
                    };
                }
                WordBreak::Normal => {
                    if let Some((break_idx, glyph_count, width)) = last_break {
                        glyphs.truncate(glyph_count);
                        return LineScan {
                            glyphs,
                            next_idx: break_idx + 1,
                            width,
                        };
                    }
                    // No break opportunity yet: the word overflows.
                }
            }
        }

        if is_whitespace {
            last_break = Some((index, glyphs.len(), pen));
            pen += kern + glyph.xadvance + letter_spacing;
        } else {
            glyphs.push(PlacedGlyph {
                x: pen + kern + glyph.xoffset,
                pen_after: pen + kern + glyph.xadvance + letter_spacing,
                glyph: *glyph,
            });
            pen += kern + glyph.xadvance + letter_spacing;
        }
        prev = Some(character);
        index += 1;
    }

    LineScan {
        glyphs,
        next_idx: chars.len(),
        width: pen,
    }
}

/// Replaces the tail of a truncated line so `line + overflow_suffix` fits:
/// glyphs are dropped back-to-front until the suffix has room.
fn truncate_with_suffix(
    font: &SdfFontFace,
    props: &TextProps,
    mut glyphs: Vec<PlacedGlyph>,
    line_width: f32,
    avail: f32,
    letter_spacing: f32,
) -> (Vec<PlacedGlyph>, f32) {
    let mut suffix: Vec<(f32, SdfGlyph)> = Vec::new();
    let mut suffix_width = 0.0_f32;
    let mut prev: Option<char> = None;
    for character in props.overflow_suffix.chars() {
        let Some(glyph) = font.glyph(character) else {
            continue;
        };
        let kern = prev.map_or(0.0, |p| font.kerning(p, character));
        suffix.push((suffix_width + kern + glyph.xoffset, *glyph));
        suffix_width += kern + glyph.xadvance + letter_spacing;
        prev = Some(character);
    }

    let mut start_pen = if glyphs.is_empty() { 0.0 } else { line_width };
    if avail.is_finite() {
        while glyphs
            .last()
            .is_some_and(|placed| placed.pen_after + suffix_width > avail)
        {
            glyphs.pop();
        }
        start_pen = glyphs.last().map_or(0.0, |placed| placed.pen_after);
    }

    for (x, glyph) in suffix {
        glyphs.push(PlacedGlyph {
            x: start_pen + x,
            pen_after: start_pen + x + glyph.xadvance,
            glyph,
        });
    }
    (glyphs, start_pen + suffix_width)
}

/// Emits one glyph quad as TL, TR, BL, BR with 4 floats per vertex.
fn emit_quad(out: &mut Vec<f32>, x: f32, y: f32, glyph: &SdfGlyph) {
    let x2 = x + glyph.width;
    let y2 = y + glyph.height;
    let u2 = glyph.u + glyph.uw;
    let v2 = glyph.v + glyph.vh;
    out.extend_from_slice(&[
        x, y, glyph.u, glyph.v,
        x2, y, u2, glyph.v,
        x, y2, glyph.u, v2,
        x2, y2, u2, v2,
    ]);
}

#[cfg(test)]
mod tests {
    use super::{layout, LayoutRequest, LineEntry, RenderWindow};
    use crate::id::TextureId;
    use crate::text::{
        Contain, FontInfo, SdfFontFace, SdfGlyph, TextAlign, TextProps, VerticalAlign, WordBreak,
    };

    /// Monospace test font: design size 10, every glyph advances 10 units
    /// and covers an 8x8 box.
    fn test_font() -> SdfFontFace {
        let mut font = SdfFontFace::new(
            "mono",
            FontInfo { size: 10.0 },
            4.0,
            8.0,
            -2.0,
            0.0,
            TextureId(1),
        );
        for c in ('A'..='Z').chain('a'..='z').chain(['.', ',']) {
            font.add_glyph(
                c,
                SdfGlyph {
                    xadvance: 10.0,
                    width: 8.0,
                    height: 8.0,
                    u: 0.1,
                    v: 0.2,
                    uw: 0.05,
                    vh: 0.05,
                    ..SdfGlyph::default()
                },
            );
        }
        font.add_glyph(
            ' ',
            SdfGlyph {
                xadvance: 10.0,
                ..SdfGlyph::default()
            },
        );
        font.loaded = true;
        font
    }

    fn props(text: &str) -> TextProps {
        TextProps {
            text: text.to_owned(),
            font_family: "mono".to_owned(),
            font_size: 10.0,
            ..TextProps::default()
        }
    }

    const FULL_WINDOW: RenderWindow = RenderWindow {
        first_line: 0,
        last_line: usize::MAX,
    };

    fn run(
        font: &SdfFontFace,
        props: &TextProps,
        window: RenderWindow,
        cache: &mut Vec<LineEntry>,
        out: &mut Vec<f32>,
    ) -> super::LayoutResult {
        layout(
            &LayoutRequest {
                font,
                props,
                window,
            },
            cache,
            out,
        )
    }

    #[test]
    fn single_line_emits_one_quad_per_visible_glyph() {
        let font = test_font();
        let props = props("AB C");
        let mut cache = Vec::new();
        let mut out = Vec::new();
        let result = run(&font, &props, FULL_WINDOW, &mut cache, &mut out);

        // The space advances the pen but emits nothing.
        assert_eq!(result.buffer_num_quads, 3);
        assert_eq!(result.buffer_num_floats, 3 * 16);
        assert_eq!(result.num_lines, 1);
        assert!(result.fully_processed);
        assert_eq!(result.max_x, 40.0);

        // Second glyph starts at pen 10; quad is TL,TR,BL,BR.
        assert_eq!(&out[16..20], &[10.0, 0.0, 0.1, 0.2]);
        assert_eq!(&out[28..32], &[18.0, 8.0, 0.15, 0.25]);
    }

    #[test]
    fn newlines_split_lines_and_fill_the_cache() {
        let font = test_font();
        let props = props("A\nB\nC\nD");
        let mut cache = Vec::new();
        let mut out = Vec::new();
        let result = run(&font, &props, FULL_WINDOW, &mut cache, &mut out);

        assert_eq!(result.num_lines, 4);
        assert_eq!(cache.len(), 4);
        assert_eq!(cache[0].codepoint_index, 0);
        assert_eq!(cache[2].codepoint_index, 4);
        assert_eq!(cache[1].max_y, 20.0);
        // Each line's single glyph sits at its line top.
        assert_eq!(out[1], 0.0);
        assert_eq!(out[17], 10.0);
    }

    #[test]
    fn normal_break_wraps_at_whitespace_and_lets_long_words_overflow() {
        let font = test_font();
        let mut props = props("AAA BB");
        props.contain = Contain::Width;
        props.width = 35.0;
        let mut cache = Vec::new();
        let mut out = Vec::new();
        let result = run(&font, &props, FULL_WINDOW, &mut cache, &mut out);
        assert_eq!(result.num_lines, 2);
        assert_eq!(cache[0].max_x, 30.0);
        assert_eq!(cache[1].codepoint_index, 4);
        assert_eq!(cache[1].max_x, 20.0);

        let mut long = self::props("AAAAAA");
        long.contain = Contain::Width;
        long.width = 35.0;
        let mut cache = Vec::new();
        let result = run(&font, &long, FULL_WINDOW, &mut cache, &mut out);
        assert_eq!(result.num_lines, 1);
        assert_eq!(result.max_x, 60.0);
    }

    #[test]
    fn break_word_splits_inside_unbreakable_words() {
        let font = test_font();
        let mut props = props("AAAAAA");
        props.contain = Contain::Width;
        props.width = 35.0;
        props.word_break = WordBreak::BreakWord;
        let mut cache = Vec::new();
        let mut out = Vec::new();
        let result = run(&font, &props, FULL_WINDOW, &mut cache, &mut out);
        assert_eq!(result.num_lines, 2);
        assert_eq!(cache[0].codepoint_index, 0);
        assert_eq!(cache[1].codepoint_index, 3);
    }

    #[test]
    fn break_all_ignores_word_boundaries() {
        let font = test_font();
        let mut props = props("AA BBBB");
        props.contain = Contain::Width;
        props.width = 45.0;
        props.word_break = WordBreak::BreakAll;
        let mut cache = Vec::new();
        let mut out = Vec::new();
        let result = run(&font, &props, FULL_WINDOW, &mut cache, &mut out);
        // "AA B" fills the first line: the second B's left edge (pen 40 +
        // width 8) exceeds 45, and break-all splits right there.
        assert_eq!(result.num_lines, 2);
        assert_eq!(cache[1].codepoint_index, 4);
    }

    #[test]
    fn zero_width_space_is_a_break_opportunity() {
        let font = test_font();
        let mut props = props("AAA\u{200B}BBB");
        props.contain = Contain::Width;
        props.width = 45.0;
        let mut cache = Vec::new();
        let mut out = Vec::new();
        let result = run(&font, &props, FULL_WINDOW, &mut cache, &mut out);
        assert_eq!(result.num_lines, 2);
        assert_eq!(cache[0].max_x, 30.0);
        assert_eq!(cache[1].codepoint_index, 4);
    }

    #[test]
    fn max_lines_truncates_with_the_overflow_suffix() {
        let font = test_font();
        let mut props = props("AAAA BBBB CCCC");
        props.contain = Contain::Width;
        props.width = 45.0;
        props.max_lines = 2;
        props.overflow_suffix = ".".to_owned();
        let mut cache = Vec::new();
        let mut out = Vec::new();
        let result = run(&font, &props, FULL_WINDOW, &mut cache, &mut out);

        assert_eq!(result.num_lines, 2);
        assert!(result.fully_processed);
        // Line 2 is "BBBB" (pen 40) + "." at 40: total 50 > 45, so one glyph
        // drops: "BBB."
        assert_eq!(cache[1].max_x, 40.0);
        // 4 (line one) + 3 + suffix = 8 quads.
        assert_eq!(result.buffer_num_quads, 8);
    }

    #[test]
    fn empty_suffix_just_drops_overflow_lines() {
        let font = test_font();
        let mut props = props("A\nB\nC\nD");
        props.max_lines = 2;
        props.overflow_suffix = String::new();
        let mut cache = Vec::new();
        let mut out = Vec::new();
        let result = run(&font, &props, FULL_WINDOW, &mut cache, &mut out);
        assert_eq!(result.num_lines, 2);
        assert_eq!(result.buffer_num_quads, 2);
        assert!(result.fully_processed);
    }

    #[test]
    fn contain_both_bounds_the_line_count_by_height() {
        let font = test_font();
        let mut props = props("A\nB\nC\nD");
        props.contain = Contain::Both;
        props.width = 100.0;
        props.height = 25.0;
        props.overflow_suffix = String::new();
        let mut cache = Vec::new();
        let mut out = Vec::new();
        let result = run(&font, &props, FULL_WINDOW, &mut cache, &mut out);
        assert_eq!(result.num_lines, 2);
    }

    #[test]
    fn contain_none_neither_wraps_nor_clamps() {
        let font = test_font();
        let mut props = props("AAAA AAAA AAAA");
        props.width = 30.0;
        props.height = 5.0;
        let mut cache = Vec::new();
        let mut out = Vec::new();
        let result = run(&font, &props, FULL_WINDOW, &mut cache, &mut out);
        assert_eq!(result.num_lines, 1);
        assert_eq!(result.max_x, 140.0);
    }

    #[test]
    fn alignment_shifts_lines_within_the_available_width() {
        let font = test_font();
        let mut props = props("AA");
        props.contain = Contain::Width;
        props.width = 40.0;
        props.text_align = TextAlign::Right;
        let mut cache = Vec::new();
        let mut out = Vec::new();
        run(&font, &props, FULL_WINDOW, &mut cache, &mut out);
        // Line width 20 in a 40 unit field: shifted by 20.
        assert_eq!(out[0], 20.0);

        props.text_align = TextAlign::Center;
        let mut cache = Vec::new();
        run(&font, &props, FULL_WINDOW, &mut cache, &mut out);
        assert_eq!(out[0], 10.0);
    }

    #[test]
    fn vertical_middle_centers_bounded_text() {
        let font = test_font();
        let mut props = props("A");
        props.contain = Contain::Both;
        props.width = 40.0;
        props.height = 30.0;
        props.vertical_align = VerticalAlign::Middle;
        let mut cache = Vec::new();
        let mut out = Vec::new();
        run(&font, &props, FULL_WINDOW, &mut cache, &mut out);
        // One 10-unit line in a 30-unit box: shifted down by 10.
        assert_eq!(out[1], 10.0);
    }

    #[test]
    fn kerning_and_letter_spacing_move_the_pen() {
        let mut font = test_font();
        font.add_kerning('A', 'B', -2.0);
        let mut props = props("AB");
        props.letter_spacing = 3.0;
        let mut cache = Vec::new();
        let mut out = Vec::new();
        let result = run(&font, &props, FULL_WINDOW, &mut cache, &mut out);
        // B starts at 10 (advance) + 3 (spacing) - 2 (kerning).
        assert_eq!(out[16], 11.0);
        assert_eq!(result.max_x, 24.0);
    }

    #[test]
    fn window_limits_emission_and_resumes_from_the_cache() {
        let font = test_font();
        let mut props = props("A\nB\nC\nD\nE\nF");
        props.scrollable = true;
        let mut cache = Vec::new();
        let mut out = Vec::new();

        // First pass: lines 2..4 only.
        let window = RenderWindow {
            first_line: 2,
            last_line: 4,
        };
        let result = run(&font, &props, window, &mut cache, &mut out);
        assert_eq!(result.buffer_num_quads, 2);
        assert!(!result.fully_processed);
        // Lines 0..3 are cached (scanned through to reach the window).
        assert_eq!(cache.len(), 4);
        // Quads are at line tops 20 and 30.
        assert_eq!(out[1], 20.0);
        assert_eq!(out[17], 30.0);

        // Scroll up: window 1..3 resumes from cached line 1 without touching
        // line 4+.
        let window = RenderWindow {
            first_line: 1,
            last_line: 3,
        };
        let result = run(&font, &props, window, &mut cache, &mut out);
        assert_eq!(result.buffer_num_quads, 2);
        assert_eq!(out[1], 10.0);
        assert_eq!(out[17], 20.0);
        assert_eq!(result.num_lines, 4);
    }

    #[test]
    fn resume_beyond_the_cache_scans_forward() {
        let font = test_font();
        let mut props = props("A\nB\nC\nD\nE\nF");
        props.scrollable = true;
        let mut cache = Vec::new();
        let mut out = Vec::new();

        let window = RenderWindow {
            first_line: 4,
            last_line: 6,
        };
        let result = run(&font, &props, window, &mut cache, &mut out);
        assert_eq!(result.buffer_num_quads, 2);
        assert!(result.fully_processed);
        assert_eq!(result.num_lines, 6);
        assert_eq!(out[1], 40.0);
    }
}
