use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use color_eyre::eyre::{eyre, OptionExt, WrapErr};
use color_eyre::Result;
use glam::{Mat4, Vec3};
use vkframe::renderer::config::{ContextConfig, RecordMode, RendererConfig};
use vkframe::renderer::core::context::Context;
use vkframe::renderer::core::surface::WindowSurface;
use vkframe::renderer::descriptor::layout::DescriptorSetLayout;
use vkframe::renderer::descriptor::pool::{DescriptorPool, DescriptorPoolBuilder};
use vkframe::renderer::frame::pacer::{FrameOutcome, SubmitExtras};
use vkframe::renderer::frame::renderer::WindowRenderer;
use vkframe::renderer::pipeline::builder::{DepthConfig, InputAssemblyConfig, PipelineBuilder, RasterizerConfig};
use vkframe::renderer::pipeline::library::ShaderLibrary;
use vkframe::renderer::pipeline::registry::PipelineRegistry;
use vkframe::renderer::resources::sampler::SamplerConfig;
use vkframe::renderer::resources::texture::Texture;
use vkframe::renderer::scene::drawable::{object_bindings, Object};
use vkframe::renderer::scene::library::ModelLibrary;
use vkframe::renderer::scene::mesh::{MeshData, Vertex};
use vkframe::renderer::scene::node::{Scene, SceneNode};
use winit::window::Window;
use crate::app::window::WinitSurface;
use crate::app::AppOptions;

fn builtin_mesh(path: &Path) -> Result<MeshData> {
    match path.to_str() {
        Some("cube") => Ok(MeshData::new_cube()),
        Some("quad") => Ok(MeshData::new_quad()),
        _ => Err(eyre!("Unknown model {:?}, expected \"cube\" or \"quad\"", path)),
    }
}

/// Everything the demo renders with. Fields drop top to bottom, the context last.
pub struct DemoState {
    scene: Scene,
    pool: DescriptorPool,
    models: ModelLibrary,
    pipelines: PipelineRegistry,
    shaders: ShaderLibrary,
    renderer: WindowRenderer,
    started: Instant,
    ctx: Arc<Context>,
}

impl DemoState {
    pub fn new(window: Arc<Window>, options: &AppOptions) -> Result<Self> {
        let surface_window: Arc<dyn WindowSurface> = Arc::new(WinitSurface(window));
        let context_config = ContextConfig {
            application_name: "vkframe demo".into(),
            enable_validation: options.validation,
            ..Default::default()
        };
        let (ctx, surface) = Context::new(&context_config, Some(surface_window.as_ref()))?;
        let ctx = Arc::new(ctx);
        let surface = surface.ok_or_eyre("Context was created without a window surface")?;

        let renderer_config = RendererConfig {
            max_frames_in_flight: options.frames_in_flight,
            vsync: !options.no_vsync,
            record_mode: if options.static_commands {
                RecordMode::Once
            } else {
                RecordMode::EveryFrame
            },
            ..Default::default()
        };
        let renderer = WindowRenderer::new(ctx.clone(), surface, surface_window, renderer_config)?;

        let layout = Arc::new(DescriptorSetLayout::new(&ctx, object_bindings())?);
        let mut shaders = ShaderLibrary::new();
        let material = shaders.load_material(
            &ctx,
            &options.data_dir.join("mesh.vert.spv"),
            &options.data_dir.join("mesh.frag.spv"),
            vec![layout.clone()],
            Vec::new(),
        )?;

        // The quad is visible from both sides
        let rasterizer = if options.model == "quad" {
            RasterizerConfig {
                cull_mode: ash::vk::CullModeFlags::NONE,
                ..Default::default()
            }
        } else {
            RasterizerConfig::default()
        };
        let builder = PipelineBuilder::new()
            .configure_drawable_input(material, Vertex::layout(), InputAssemblyConfig::default())
            .configure_rasterizer(rasterizer)
            .configure_depth(DepthConfig::default())
            .configure_render_pass(renderer.render_pass(), 0)?;
        let mut pipelines = PipelineRegistry::new();
        let pipeline = pipelines.build(&ctx, builder)?;

        let mut models = ModelLibrary::new();
        let drawable = models.load_drawable(&ctx, Path::new(&options.model), &pipeline, builtin_mesh)?;

        let texture = match options.texture.as_ref() {
            Some(path) => {
                let image = image::open(path)
                    .wrap_err_with(|| format!("Failed to open texture {:?}", path))?;
                Texture::from_image(&ctx, &image, &SamplerConfig::default())?
            }
            None => Texture::white(&ctx)?,
        };

        let image_count = renderer.image_count();
        let mut pool = DescriptorPoolBuilder::new()
            .add_layout(&layout, image_count as u32)
            .create_pool(&ctx, image_count as u32)?;
        let object = Object::new(&ctx, &mut pool, drawable, Arc::new(texture), image_count)?;

        let mut scene = Scene::default();
        scene.add_root(SceneNode::with_leaf(Mat4::IDENTITY, object));

        log::info!(
            "Demo ready: {:?} with {} swap chain images and {} frames in flight",
            options.model,
            image_count,
            renderer.frames_in_flight(),
        );

        Ok(Self {
            scene,
            pool,
            models,
            pipelines,
            shaders,
            renderer,
            started: Instant::now(),
            ctx,
        })
    }

    pub fn resized(&mut self) {
        self.renderer.set_framebuffer_resized(true);
    }

    pub fn draw(&mut self) -> Result<()> {
        let elapsed = self.started.elapsed().as_secs_f32();
        let extent = self.renderer.extent();
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let projection = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, Vec3::Y);
        self.scene.view_projection = projection * view;
        if let Some(root) = self.scene.roots_mut().first_mut() {
            root.transform = Mat4::from_rotation_y(elapsed * 0.8) * Mat4::from_rotation_x(elapsed * 0.3);
        }

        match self.renderer.draw_scene(&mut self.scene, &SubmitExtras::default())? {
            FrameOutcome::Presented(report) if report.recreated => {
                log::debug!(
                    "Swap chain rebuilt after frame {} (generation {})",
                    report.frame,
                    self.renderer.swap_chain_generation(),
                );
            }
            FrameOutcome::Presented(_) => {}
            FrameOutcome::Recreated => log::debug!("Swap chain was out of date, frame dropped"),
            FrameOutcome::Skipped => {}
        }
        Ok(())
    }

    /// Makes recorded command buffers pick up scene changes in static command mode
    pub fn invalidate_commands(&mut self) {
        self.renderer.invalidate_commands();
        log::info!("Command buffers will be recorded again");
    }

    /// Releases cached shaders and models nothing uses any more
    pub fn trim_caches(&mut self) {
        self.shaders.optimize();
        self.models.optimize();
        log::debug!(
            "{} pipelines, {} materials, {} models cached, {} sets left in the pool",
            self.pipelines.len(),
            self.shaders.material_count(),
            self.models.len(),
            self.pool.budget().sets_remaining(),
        );
    }
}

impl Drop for DemoState {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            log::error!("Failed to wait for the device to go idle: {e}");
        }
    }
}
