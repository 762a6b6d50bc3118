use ash::vk;

/// Options consumed once while the context is created
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub application_name: String,
    pub enable_validation: bool,
    pub api_version: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            application_name: "vkframe".into(),
            enable_validation: cfg!(debug_assertions),
            api_version: vk::API_VERSION_1_2,
        }
    }
}

/// Whether command buffers are rebuilt for every frame or recorded once per swap chain image
/// and replayed until invalidated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordMode {
    #[default]
    EveryFrame,
    Once,
}

/// Contains configuration options for the renderer like vsync and the frame pipelining depth
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub max_frames_in_flight: usize,
    pub vsync: bool,
    pub clear_color: [f32; 4],
    pub depth_format: vk::Format,
    pub record_mode: RecordMode,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            max_frames_in_flight: 2,
            vsync: true,
            clear_color: [0.02, 0.02, 0.03, 1.0],
            depth_format: vk::Format::D32_SFLOAT,
            record_mode: RecordMode::EveryFrame,
        }
    }
}
