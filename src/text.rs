//! SDF text: font faces, text properties, and per-node text state.
//!
//! Text is laid out against a signed-distance-field font atlas into a vertex
//! buffer of glyph quads (4 floats per vertex: position x/y, atlas u/v). The
//! layout engine itself lives in [`layout`]; this module owns the font-face
//! contract, the public text properties, and the per-node state that tracks
//! the render window, line cache, and load status.

use ahash::{HashMap, HashMapExt};

use crate::color::Color;
use crate::id::{GpuBufferId, TextureId};

pub mod layout;

use layout::{LayoutRequest, LayoutResult, LineEntry, RenderWindow};

// ── Font face ────────────────────────────────────────────────────────────────

/// Base design-space metadata of an SDF font.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FontInfo {
    /// Base size in SDF design units; `font_size / size` is the scale ratio.
    pub size: f32,
}

/// One glyph's placement and atlas window, in SDF design units. Atlas
/// coordinates are normalized.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SdfGlyph {
    pub xadvance: f32,
    pub xoffset: f32,
    pub yoffset: f32,
    pub width: f32,
    pub height: f32,
    pub u: f32,
    pub v: f32,
    pub uw: f32,
    pub vh: f32,
}

/// A parsed SDF font face plus its atlas texture handle.
#[derive(Debug, Clone)]
pub struct SdfFontFace {
    pub family: String,
    pub info: FontInfo,
    /// Distance-field range in design units; scaled by the font-size ratio at
    /// draw time.
    pub distance_range: f32,
    pub ascender: f32,
    pub descender: f32,
    pub line_gap: f32,
    pub atlas_texture: TextureId,
    /// Flipped by the font-load completion; pending text states retry then.
    pub loaded: bool,
    glyphs: HashMap<u32, SdfGlyph>,
    kernings: HashMap<(u32, u32), f32>,
}

impl SdfFontFace {
    pub fn new(
        family: impl Into<String>,
        info: FontInfo,
        distance_range: f32,
        ascender: f32,
        descender: f32,
        line_gap: f32,
        atlas_texture: TextureId,
    ) -> Self {
        Self {
            family: family.into(),
            info,
            distance_range,
            ascender,
            descender,
            line_gap,
            atlas_texture,
            loaded: false,
            glyphs: HashMap::new(),
            kernings: HashMap::new(),
        }
    }

    pub fn add_glyph(&mut self, codepoint: char, glyph: SdfGlyph) {
        self.glyphs.insert(codepoint as u32, glyph);
    }

    pub fn add_kerning(&mut self, prev: char, curr: char, offset: f32) {
        self.kernings.insert((prev as u32, curr as u32), offset);
    }

    pub fn glyph(&self, codepoint: char) -> Option<&SdfGlyph> {
        self.glyphs.get(&(codepoint as u32))
    }

    pub fn kerning(&self, prev: char, curr: char) -> f32 {
        self.kernings
            .get(&(prev as u32, curr as u32))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Line height derived from the metrics when the application does not
    /// set one explicitly.
    pub fn default_line_height(&self, font_size: f32) -> f32 {
        (self.ascender - self.descender + self.line_gap) * font_size / self.info.size
    }
}

// ── Text properties ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerticalAlign {
    #[default]
    Top,
    Middle,
    Bottom,
}

/// How the element's rectangle constrains layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Contain {
    /// No word wrap, no vertical clamping.
    #[default]
    None,
    /// Wrap at `width`; unlimited height.
    Width,
    /// Wrap at `width` and bound the visible line count by `height`.
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordBreak {
    /// Break only at whitespace / zero-width space; long words overflow.
    #[default]
    Normal,
    /// Break at whitespace when the word fits, inside the word otherwise.
    BreakWord,
    /// Break at any grapheme boundary.
    BreakAll,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextProps {
    pub text: String,
    pub font_family: String,
    pub font_size: f32,
    pub letter_spacing: f32,
    /// `None` computes the line height from the font metrics.
    pub line_height: Option<f32>,
    /// 0 = unlimited.
    pub max_lines: u32,
    pub text_align: TextAlign,
    pub vertical_align: VerticalAlign,
    pub contain: Contain,
    pub width: f32,
    pub height: f32,
    pub offset_y: f32,
    pub scroll_y: f32,
    pub scrollable: bool,
    pub word_break: WordBreak,
    pub overflow_suffix: String,
    pub color: Color,
    pub debug: bool,
    /// Forces a first layout irrespective of viewport overlap. The
    /// render-window short-circuit still applies afterwards.
    pub force_load: bool,
}

impl Default for TextProps {
    fn default() -> Self {
        Self {
            text: String::new(),
            font_family: String::new(),
            font_size: 16.0,
            letter_spacing: 0.0,
            line_height: None,
            max_lines: 0,
            text_align: TextAlign::Left,
            vertical_align: VerticalAlign::Top,
            contain: Contain::None,
            width: 0.0,
            height: 0.0,
            offset_y: 0.0,
            scroll_y: 0.0,
            scrollable: false,
            word_break: WordBreak::Normal,
            overflow_suffix: "...".to_owned(),
            color: Color::WHITE,
            debug: false,
            force_load: false,
        }
    }
}

// ── Per-node text state ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TextStatus {
    /// Waiting for the font face to load.
    Pending,
    Ready,
    /// The font family could not be resolved; renders nothing.
    Failed,
}

#[derive(Debug)]
pub(crate) struct TextState {
    pub props: TextProps,
    pub status: TextStatus,
    pub buffer: Vec<f32>,
    pub num_quads: u32,
    pub line_cache: Vec<LineEntry>,
    pub window: Option<RenderWindow>,
    pub computed_width: f32,
    pub computed_height: f32,
    /// Props changed since the last layout; invalidates the line cache.
    pub dirty: bool,
    /// Set once the first successful layout has reported `loaded`.
    pub announced: bool,
    pub gpu_buffer: Option<GpuBufferId>,
    pub buffer_uploaded: bool,
    pub forced_layout_done: bool,
}

impl TextState {
    pub(crate) fn new(props: TextProps) -> Self {
        Self {
            props,
            status: TextStatus::Pending,
            buffer: Vec::new(),
            num_quads: 0,
            line_cache: Vec::new(),
            window: None,
            computed_width: 0.0,
            computed_height: 0.0,
            dirty: true,
            announced: false,
            gpu_buffer: None,
            buffer_uploaded: false,
            forced_layout_done: false,
        }
    }

    /// Applies new props. A pure `scroll_y` change keeps the line cache; any
    /// other change invalidates cache and window.
    pub(crate) fn set_props(&mut self, props: TextProps) {
        let scroll_only = {
            let mut probe = props.clone();
            probe.scroll_y = self.props.scroll_y;
            probe == self.props
        };
        self.props = props;
        if !scroll_only {
            self.line_cache.clear();
            self.window = None;
            self.dirty = true;
            self.announced = false;
        }
    }

    pub(crate) fn line_height_px(&self, font: &SdfFontFace) -> f32 {
        self.props
            .line_height
            .unwrap_or_else(|| font.default_line_height(self.props.font_size))
    }

    /// Lays out the glyphs needed for `visible_y` (a vertical range in the
    /// element's local pixels, `None` = everything). Returns `None` when the
    /// previous render window already covers the request.
    pub(crate) fn refresh(
        &mut self,
        font: &SdfFontFace,
        visible_y: Option<(f32, f32)>,
    ) -> Option<LayoutResult> {
        let line_height = self.line_height_px(font);
        let window = self.required_window(line_height, visible_y);

        if !self.dirty {
            if let Some(previous) = &self.window {
                if previous.first_line <= window.first_line
                    && previous.last_line >= window.last_line
                {
                    return None;
                }
            }
        }

        if self.dirty {
            self.line_cache.clear();
        }

        let request = LayoutRequest {
            font,
            props: &self.props,
            window,
        };
        let result = layout::layout(&request, &mut self.line_cache, &mut self.buffer);
        self.num_quads = result.buffer_num_quads;
        self.computed_width = result.max_x;
        self.computed_height = result.num_lines as f32 * line_height;
        self.window = Some(window);
        self.dirty = false;
        self.buffer_uploaded = false;
        self.status = TextStatus::Ready;
        Some(result)
    }

    fn required_window(&self, line_height: f32, visible_y: Option<(f32, f32)>) -> RenderWindow {
        let Some((top_px, bottom_px)) = visible_y else {
            return RenderWindow {
                first_line: 0,
                last_line: usize::MAX,
            };
        };
        // Visible range in text space: scrolled, relative to the text origin.
        let top = top_px + self.props.scroll_y - self.props.offset_y;
        let bottom = bottom_px + self.props.scroll_y - self.props.offset_y;
        let first = (top / line_height).floor() as i64 - 1;
        let last = (bottom / line_height).ceil() as i64 + 1;
        RenderWindow {
            first_line: first.max(0) as usize,
            last_line: last.max(1) as usize,
        }
    }
}
