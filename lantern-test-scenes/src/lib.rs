pub mod expectations;
pub mod scene;

pub use expectations::{
    draw_calls, framebuffer_binds, parse_quads, scissors, total_indices, uniform_values, QuadVertex,
};
pub use scene::{
    build_clipping_scene, build_grid_scene, build_rtt_scene, build_single_quad_scene,
    build_z_order_scene, install_test_font, recorded, test_renderer, CANVAS_HEIGHT, CANVAS_WIDTH,
};
