//! Scene builders shared between the integration suite and the benches.

use lantern::{
    Color, EngineSettings, FontInfo, GpuCommand, NodeId, NodeProps, RecordingDevice, Renderer,
    SdfFontFace, SdfGlyph, TextureId,
};

pub const CANVAS_WIDTH: f32 = 1920.0;
pub const CANVAS_HEIGHT: f32 = 1080.0;

/// A renderer on a recording device with the default 1920x1080 canvas.
pub fn test_renderer() -> Renderer {
    Renderer::new(
        Box::new(RecordingDevice::default()),
        EngineSettings::default(),
    )
    .expect("engine construction on the recording device")
}

/// Drains the recorded command stream of a [`test_renderer`].
pub fn recorded(renderer: &mut Renderer) -> Vec<GpuCommand> {
    renderer
        .device_mut()
        .as_any()
        .downcast_mut::<RecordingDevice>()
        .expect("test_renderer runs on a RecordingDevice")
        .take_commands()
}

/// One opaque red quad under the root (scenario S1).
pub fn build_single_quad_scene(renderer: &mut Renderer) -> NodeId {
    renderer
        .create_node(&NodeProps {
            x: 100.0,
            y: 200.0,
            width: 300.0,
            height: 150.0,
            color: Color(0xFF0000FF),
            ..NodeProps::default()
        })
        .expect("child under root")
}

/// A clipping parent with a child extending past it (scenario S2).
/// Returns `(parent, child)`.
pub fn build_clipping_scene(renderer: &mut Renderer) -> (NodeId, NodeId) {
    let parent = renderer
        .create_node(&NodeProps {
            x: 100.0,
            y: 100.0,
            width: 200.0,
            height: 200.0,
            clipping: true,
            ..NodeProps::default()
        })
        .expect("parent under root");
    let child = renderer
        .create_node(&NodeProps {
            parent: Some(parent),
            x: 150.0,
            y: 150.0,
            width: 200.0,
            height: 200.0,
            color: Color(0x00FF00FF),
            ..NodeProps::default()
        })
        .expect("child under parent");
    (parent, child)
}

/// Three siblings with z-indices 2, 1, 2 inserted as A, B, C (scenario S3).
pub fn build_z_order_scene(renderer: &mut Renderer) -> (NodeId, NodeId, NodeId) {
    let mut sibling = |z_index: i32| {
        renderer
            .create_node(&NodeProps {
                width: 50.0,
                height: 50.0,
                color: Color(0xFFFFFFFF),
                z_index,
                ..NodeProps::default()
            })
            .expect("sibling under root")
    };
    let a = sibling(2);
    let b = sibling(1);
    let c = sibling(2);
    (a, b, c)
}

/// A 256x256 render-to-texture host with two children (scenario S4).
/// Returns `(host, x, y)`.
pub fn build_rtt_scene(renderer: &mut Renderer) -> (NodeId, NodeId, NodeId) {
    let host = renderer
        .create_node(&NodeProps {
            x: 300.0,
            y: 300.0,
            width: 256.0,
            height: 256.0,
            rtt: true,
            ..NodeProps::default()
        })
        .expect("rtt host under root");
    let x = renderer
        .create_node(&NodeProps {
            parent: Some(host),
            x: 10.0,
            y: 10.0,
            width: 100.0,
            height: 100.0,
            color: Color(0xFF0000FF),
            ..NodeProps::default()
        })
        .expect("first rtt child");
    let y = renderer
        .create_node(&NodeProps {
            parent: Some(host),
            x: 120.0,
            y: 120.0,
            width: 100.0,
            height: 100.0,
            color: Color(0x0000FFFF),
            ..NodeProps::default()
        })
        .expect("second rtt child");
    (host, x, y)
}

/// Registers a monospace SDF test font (design size 10, every glyph a
/// 10-unit advance over an 8x8 box) and returns its atlas texture id.
pub fn install_test_font(renderer: &mut Renderer, family: &str, loaded: bool) -> TextureId {
    let atlas = renderer.create_texture_with_pixels(64, 64, vec![255u8; 64 * 64 * 4], false);
    let mut face = SdfFontFace::new(
        family,
        FontInfo { size: 10.0 },
        4.0,
        8.0,
        -2.0,
        0.0,
        atlas,
    );
    for c in ('A'..='Z').chain('a'..='z').chain(['.', ',']) {
        face.add_glyph(
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
    face.add_glyph(
        ' ',
        SdfGlyph {
            xadvance: 10.0,
            ..SdfGlyph::default()
        },
    );
    face.loaded = loaded;
    renderer.register_font(face);
    atlas
}

/// A `columns x rows` grid of colored quads for throughput benches.
/// Returns the grid container node.
pub fn build_grid_scene(renderer: &mut Renderer, columns: u32, rows: u32) -> NodeId {
    let container = renderer
        .create_node(&NodeProps {
            width: CANVAS_WIDTH,
            height: CANVAS_HEIGHT,
            ..NodeProps::default()
        })
        .expect("grid container");
    let cell_w = CANVAS_WIDTH / columns as f32;
    let cell_h = CANVAS_HEIGHT / rows as f32;
    for row in 0..rows {
        for column in 0..columns {
            renderer
                .create_node(&NodeProps {
                    parent: Some(container),
                    x: column as f32 * cell_w,
                    y: row as f32 * cell_h,
                    width: cell_w - 2.0,
                    height: cell_h - 2.0,
                    color: Color::rgba(
                        (column * 17 % 256) as u8,
                        (row * 29 % 256) as u8,
                        128,
                        255,
                    ),
                    ..NodeProps::default()
                })
                .expect("grid cell");
        }
    }
    container
}
