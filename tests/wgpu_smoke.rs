//! Smoke test on the real wgpu backend.
//!
//! Skips silently when no GPU adapter is available (e.g. bare CI runners);
//! with one present, it brings up the headless device, compiles the built-in
//! programs, and renders frames end to end.
//!
//! Run with:   cargo test --test wgpu_smoke

use futures::executor::block_on;
use lantern::{Color, EngineSettings, NodeProps, Renderer, WgpuDevice};

#[test]
fn wgpu_backend_renders_frames_headless() {
    env_logger::builder().is_test(true).try_init().ok();

    let Ok(device) = block_on(WgpuDevice::new_headless((1920, 1080))) else {
        // No adapter on this machine; nothing to smoke-test.
        return;
    };
    let mut renderer =
        Renderer::new(Box::new(device), EngineSettings::default()).expect("engine construction");

    let node = renderer
        .create_node(&NodeProps {
            x: 100.0,
            y: 200.0,
            width: 300.0,
            height: 150.0,
            color: Color(0xFF0000FF),
            ..NodeProps::default()
        })
        .unwrap();

    let stats = renderer.render_frame();
    assert_eq!(stats.quads, 1);
    assert_eq!(stats.render_ops, 1);

    // A render-to-texture subtree exercises the offscreen pass path.
    let host = renderer
        .create_node(&NodeProps {
            x: 600.0,
            y: 100.0,
            width: 128.0,
            height: 128.0,
            rtt: true,
            ..NodeProps::default()
        })
        .unwrap();
    renderer
        .create_node(&NodeProps {
            parent: Some(host),
            width: 64.0,
            height: 64.0,
            color: Color(0x00FF00FF),
            ..NodeProps::default()
        })
        .unwrap();
    let stats = renderer.render_frame();
    assert_eq!(stats.passes, 2);

    renderer.destroy_node(node);
    renderer.render_frame();
}
