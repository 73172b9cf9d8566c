use std::sync::mpsc;

use ahash::HashMapExt;

use super::*;
use crate::texture::TextureState;

impl Renderer {
    /// Builds an engine on the given GPU device. Compiles the built-in
    /// programs; shader compile or link failures abort construction.
    pub fn new(mut device: Box<dyn GpuDevice>, settings: EngineSettings) -> Result<Self, InitError> {
        let capabilities = device.capabilities();
        if capabilities.max_texture_units == 0 {
            return Err(InitError::GpuCapabilityMissing(
                "at least one fragment texture unit".to_owned(),
            ));
        }
        log::info!(
            "initializing renderer: {}x{} logical, {} texture units, {} byte vertex arena",
            settings.width,
            settings.height,
            capabilities.max_texture_units,
            settings.buffer_memory,
        );

        let shaders = ShaderRegistry::new(device.as_mut())?;
        let batcher = DrawBatcher::new(device.as_mut(), settings.buffer_memory);
        let scene = SceneGraph::new(settings.width, settings.height);
        let mut memory = TextureMemoryManager::new(settings.texture_memory_budget);

        let mut textures = TextureStore::new();
        // The shared 1x1 white default must be resident before the first
        // frame.
        let white = textures.white();
        let white_texture = textures.get_mut(white).expect("white texture exists");
        let pixels = white_texture.pixels.clone().expect("white pixels staged");
        white_texture.gpu = Some(device.create_texture(1, 1, &pixels));
        white_texture.state = TextureState::Loaded;
        let white_bytes = white_texture.byte_size();
        memory.note_loaded(white_bytes);

        let (sender, receiver) = mpsc::channel();

        Ok(Self {
            settings,
            device,
            scene,
            textures,
            memory,
            shaders,
            batcher,
            fonts: HashMap::new(),
            text_states: HashMap::new(),
            pending_font_nodes: Vec::new(),
            rtt_targets: HashMap::new(),
            completion_sender: CompletionSender(sender),
            completion_receiver: receiver,
            tweeners: Vec::new(),
            tween_scratch: Vec::new(),
            last_frame_at: None,
            last_stats: FrameStats::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::gpu::recording::RecordingDevice;
    use crate::renderer::{EngineSettings, InitError, Renderer};

    #[test]
    fn construction_succeeds_with_defaults() {
        let renderer = Renderer::new(
            Box::new(RecordingDevice::default()),
            EngineSettings::default(),
        )
        .unwrap();
        assert_eq!(renderer.settings().width, 1920.0);
        // The white default texture is resident from the start.
        assert_eq!(renderer.resident_texture_bytes(), 4);
    }

    #[test]
    fn a_device_without_texture_units_is_rejected() {
        let result = Renderer::new(
            Box::new(RecordingDevice::new(0)),
            EngineSettings::default(),
        );
        assert!(matches!(result, Err(InitError::GpuCapabilityMissing(_))));
    }
}
