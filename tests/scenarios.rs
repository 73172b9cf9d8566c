//! End-to-end scenarios driven through the recording GPU device.
//!
//! These exercise the full pipeline: property setters, the dirty-flag update
//! traversal, the draw batcher, render-to-texture passes, and texture memory
//! accounting, asserting on the emitted GPU command stream.
//!
//! Run with:   cargo test --test scenarios

use lantern::{
    Bound, Color, EngineSettings, GpuCommand, NodeEvent, NodeProps, RecordingDevice, Renderer,
    ScissorRect, TextureState, UniformValue, UpdateType,
};
use lantern_test_scenes::{
    build_clipping_scene, build_grid_scene, build_rtt_scene, build_single_quad_scene,
    build_z_order_scene, draw_calls, framebuffer_binds, parse_quads, recorded, scissors,
    test_renderer, total_indices, uniform_values,
};

fn uploads(commands: &[GpuCommand]) -> Vec<Vec<u8>> {
    commands
        .iter()
        .filter_map(|command| match command {
            GpuCommand::UploadVertices { bytes, .. } => Some(bytes.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn s1_opaque_quad_produces_one_op_with_exact_vertices() {
    let mut renderer = test_renderer();
    build_single_quad_scene(&mut renderer);

    let resident_before = renderer.resident_texture_bytes();
    let stats = renderer.render_frame();

    assert_eq!(stats.render_ops, 1);
    assert_eq!(stats.quads, 1);
    assert_eq!(stats.passes, 1);
    // The default 1x1 white texture is reused; nothing new becomes resident.
    assert_eq!(renderer.resident_texture_bytes(), resident_before);

    let commands = recorded(&mut renderer);
    let uploads = uploads(&commands);
    assert_eq!(uploads.len(), 1);
    let quads = parse_quads(&uploads[0]);
    assert_eq!(quads.len(), 1);

    let top_left = quads[0][0];
    assert_eq!((top_left.x, top_left.y), (100.0, 200.0));
    assert_eq!((top_left.u, top_left.v), (0.0, 0.0));
    assert_eq!(top_left.color, [0xFF, 0x00, 0x00, 0xFF]);
    assert_eq!(top_left.texture_index, 0.0);

    let bottom_right = quads[0][3];
    assert_eq!((bottom_right.x, bottom_right.y), (400.0, 350.0));
    assert_eq!((bottom_right.u, bottom_right.v), (1.0, 1.0));
    assert_eq!(bottom_right.color, [0xFF, 0x00, 0x00, 0xFF]);

    assert_eq!(draw_calls(&commands), vec![(6, 0)]);
}

#[test]
fn s2_clipping_propagates_to_children_and_drives_the_scissor() {
    let mut renderer = test_renderer();
    let (parent, child) = build_clipping_scene(&mut renderer);
    renderer.render_frame();

    // The clipping parent contributes its post-transform rectangle; the
    // non-clipping child inherits the chain unchanged.
    let parent_clip = renderer.snapshot(parent).unwrap().clipping_rect;
    let child_clip = renderer.snapshot(child).unwrap().clipping_rect;
    assert_eq!(parent_clip, Bound::new(100.0, 100.0, 300.0, 300.0));
    assert_eq!(child_clip, parent_clip);

    // Bottom-origin conversion: y = 1080 - 200 - 100.
    let commands = recorded(&mut renderer);
    assert!(scissors(&commands).contains(&Some(ScissorRect {
        x: 100,
        y: 780,
        width: 200,
        height: 200,
    })));
}

#[test]
fn s3_z_order_ties_break_by_insertion_order() {
    let mut renderer = test_renderer();
    let (a, b, c) = build_z_order_scene(&mut renderer);
    renderer.render_frame();

    assert_eq!(renderer.sorted_children(renderer.root()), vec![b, a, c]);
}

#[test]
fn s4_rtt_subtree_renders_into_its_framebuffer_before_the_screen() {
    let mut renderer = Renderer::new(
        Box::new(RecordingDevice::default()),
        EngineSettings {
            pixel_ratio: 2.0,
            ..EngineSettings::default()
        },
    )
    .unwrap();
    build_rtt_scene(&mut renderer);

    let stats = renderer.render_frame();
    assert_eq!(stats.passes, 2);

    let commands = recorded(&mut renderer);
    let binds = framebuffer_binds(&commands);
    assert_eq!(binds.len(), 2);
    assert!(binds[0].is_some(), "rtt pass binds its framebuffer first");
    assert!(binds[1].is_none(), "screen pass restores the default target");

    // The rtt pass resolves against the framebuffer with pixel ratio forced
    // to 1; the screen pass uses the canvas and the configured ratio.
    assert_eq!(
        uniform_values(&commands, "u_resolution"),
        vec![
            UniformValue::Vec2([256.0, 256.0]),
            UniformValue::Vec2([1920.0, 1080.0]),
        ]
    );
    assert_eq!(
        uniform_values(&commands, "u_pixelRatio"),
        vec![UniformValue::Float(1.0), UniformValue::Float(2.0)]
    );

    // Both rtt children share one op; the host quad is its own op.
    assert_eq!(stats.render_ops, 2);
    assert_eq!(stats.quads, 3);

    // A clean second frame skips the rtt pass but still draws the screen.
    let stats = renderer.render_frame();
    assert_eq!(stats.passes, 1);
    let commands = recorded(&mut renderer);
    assert_eq!(framebuffer_binds(&commands), vec![None]);
}

#[test]
fn s6_eviction_frees_the_longest_idle_textures() {
    const MB: u64 = 1024 * 1024;
    let mut renderer = Renderer::new(
        Box::new(RecordingDevice::default()),
        EngineSettings {
            // Budget for four 512x512 textures plus the white default.
            texture_memory_budget: 4 * MB + 4,
            ..EngineSettings::default()
        },
    )
    .unwrap();

    let mut textures = Vec::new();
    let mut nodes = Vec::new();
    for i in 0..4u32 {
        let texture =
            renderer.create_texture_with_pixels(512, 512, vec![0u8; MB as usize], false);
        let node = renderer
            .create_node(&NodeProps {
                x: i as f32 * 120.0,
                width: 100.0,
                height: 100.0,
                texture: Some(texture),
                ..NodeProps::default()
            })
            .unwrap();
        textures.push(texture);
        nodes.push(node);
    }
    renderer.render_frame();
    assert_eq!(renderer.resident_texture_bytes(), 4 * MB + 4);

    // Release the first two; exactly at budget, so nothing evicts yet.
    renderer.destroy_node(nodes[0]);
    renderer.destroy_node(nodes[1]);
    let stats = renderer.render_frame();
    assert_eq!(stats.evicted_textures, 0);
    assert_eq!(renderer.resident_texture_bytes(), 4 * MB + 4);

    // A fifth texture pushes residency over budget: the two longest-idle
    // textures are freed, in made-idle order.
    let fifth = renderer.create_texture_with_pixels(512, 512, vec![0u8; MB as usize], false);
    renderer
        .create_node(&NodeProps {
            x: 600.0,
            width: 100.0,
            height: 100.0,
            texture: Some(fifth),
            ..NodeProps::default()
        })
        .unwrap();
    let stats = renderer.render_frame();

    assert_eq!(stats.evicted_textures, 2);
    assert_eq!(renderer.resident_texture_bytes(), 3 * MB + 4);
    assert_eq!(renderer.texture_state(textures[0]), Some(TextureState::Freed));
    assert_eq!(renderer.texture_state(textures[1]), Some(TextureState::Freed));
    assert_eq!(renderer.texture_state(textures[2]), Some(TextureState::Loaded));
    assert_eq!(renderer.texture_state(textures[3]), Some(TextureState::Loaded));
    assert_eq!(renderer.texture_state(fifth), Some(TextureState::Loaded));
}

// ── Invariants ───────────────────────────────────────────────────────────────

#[test]
fn world_alpha_is_the_product_of_the_ancestor_chain() {
    let mut renderer = test_renderer();
    let parent = renderer
        .create_node(&NodeProps {
            width: 100.0,
            height: 100.0,
            alpha: 0.5,
            color: Color(0xFFFFFFFF),
            ..NodeProps::default()
        })
        .unwrap();
    let child = renderer
        .create_node(&NodeProps {
            parent: Some(parent),
            width: 50.0,
            height: 50.0,
            alpha: 0.4,
            color: Color(0xFFFFFFFF),
            ..NodeProps::default()
        })
        .unwrap();
    renderer.render_frame();

    let parent_alpha = renderer.snapshot(parent).unwrap().world_alpha;
    let child_alpha = renderer.snapshot(child).unwrap().world_alpha;
    assert!((parent_alpha - 0.5).abs() < 1e-6);
    assert!((child_alpha - 0.2).abs() < 1e-6);
}

#[test]
fn update_traversal_clears_every_dirty_bit() {
    let mut renderer = test_renderer();
    let container = build_grid_scene(&mut renderer, 4, 4);
    renderer.render_frame();

    assert_eq!(
        renderer.snapshot(container).unwrap().update_type,
        UpdateType::empty()
    );
    assert_eq!(
        renderer.snapshot(renderer.root()).unwrap().update_type,
        UpdateType::empty()
    );
}

#[test]
fn draw_call_count_matches_ops_and_index_totals_match_quads() {
    let mut renderer = test_renderer();
    build_grid_scene(&mut renderer, 10, 10);
    let stats = renderer.render_frame();

    let commands = recorded(&mut renderer);
    assert_eq!(draw_calls(&commands).len() as u32, stats.render_ops);
    assert_eq!(total_indices(&commands), 6 * stats.quads);
    assert_eq!(stats.quads, 100);
}

#[test]
fn rotated_quads_emit_the_affine_transform_of_the_corners() {
    let mut renderer = test_renderer();
    renderer
        .create_node(&NodeProps {
            x: 500.0,
            y: 500.0,
            width: 100.0,
            height: 100.0,
            pivot_x: 0.0,
            pivot_y: 0.0,
            rotation: std::f32::consts::FRAC_PI_2,
            color: Color(0xFFFFFFFF),
            ..NodeProps::default()
        })
        .unwrap();
    renderer.render_frame();

    let commands = recorded(&mut renderer);
    let upload = uploads(&commands).remove(0);
    let quad = parse_quads(&upload)[0];

    let close = |actual: (f32, f32), expected: (f32, f32)| {
        assert!(
            (actual.0 - expected.0).abs() < 1e-3 && (actual.1 - expected.1).abs() < 1e-3,
            "expected {expected:?}, got {actual:?}"
        );
    };
    // 90-degree rotation around the top-left corner: (w, 0) -> (0, w).
    close((quad[0].x, quad[0].y), (500.0, 500.0));
    close((quad[1].x, quad[1].y), (500.0, 600.0));
    close((quad[2].x, quad[2].y), (400.0, 500.0));
    close((quad[3].x, quad[3].y), (400.0, 600.0));
}

// ── Idempotence ──────────────────────────────────────────────────────────────

#[test]
fn setting_the_same_value_twice_is_observationally_silent() {
    let mut renderer = test_renderer();
    let child = build_single_quad_scene(&mut renderer);
    renderer.render_frame();
    renderer.drain_events();

    renderer.set_x(child, 100.0);
    renderer.render_frame();
    assert!(renderer.drain_events().is_empty());
    assert_eq!(
        renderer.snapshot(child).unwrap().update_type,
        UpdateType::empty()
    );
}

#[test]
fn unchanged_scenes_replay_identical_command_streams() {
    let mut renderer = test_renderer();
    build_single_quad_scene(&mut renderer);

    renderer.render_frame();
    recorded(&mut renderer);

    renderer.render_frame();
    let second = recorded(&mut renderer);
    renderer.render_frame();
    let third = recorded(&mut renderer);
    assert_eq!(second, third);
}

#[test]
fn destroyed_nodes_ignore_mutators_and_emit_nothing() {
    let mut renderer = test_renderer();
    let child = build_single_quad_scene(&mut renderer);
    renderer.render_frame();

    renderer.destroy_node(child);
    let events = renderer.drain_events();
    assert!(events.contains(&(child, NodeEvent::Destroyed)));

    renderer.set_x(child, 500.0);
    renderer.set_color(child, Color(0x00FF00FF));
    renderer.destroy_node(child);
    renderer.render_frame();
    assert!(renderer.drain_events().is_empty());
    assert!(renderer.snapshot(child).is_none());

    // And the quad is gone from the stream.
    let stats = renderer.last_frame_stats();
    assert_eq!(stats.quads, 0);
}

#[test]
fn reparenting_is_atomic_and_rejects_cycles() {
    let mut renderer = test_renderer();
    let first = renderer.create_node(&NodeProps::default()).unwrap();
    let second = renderer.create_node(&NodeProps::default()).unwrap();
    let child = renderer
        .create_node(&NodeProps {
            parent: Some(first),
            ..NodeProps::default()
        })
        .unwrap();
    renderer.render_frame();
    renderer.drain_events();

    renderer.add_child(second, child).unwrap();
    let events = renderer.drain_events();
    assert!(events.contains(&(
        child,
        NodeEvent::ParentChanged {
            old_parent: Some(first),
            new_parent: Some(second),
        }
    )));

    assert!(renderer.add_child(child, second).is_err());
}
