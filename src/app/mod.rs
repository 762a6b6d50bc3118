mod demo;
mod window;

use std::path::PathBuf;
use std::sync::Arc;
use clap::Parser;
use color_eyre::{Report, Result};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};
use crate::app::demo::DemoState;

/// Spinning textured model rendered through the frame engine
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct AppOptions {
    /// Directory holding the compiled SPIR-V shaders
    #[arg(long, default_value = concat!(env!("CARGO_MANIFEST_DIR"), "/shaders-built"))]
    pub data_dir: PathBuf,

    /// Built-in model to draw: "cube" or "quad"
    #[arg(long, default_value = "cube")]
    pub model: String,

    /// Image file applied to the model. Plain white when omitted.
    #[arg(long)]
    pub texture: Option<PathBuf>,

    /// Enable the Vulkan validation layers
    #[arg(long)]
    pub validation: bool,

    #[arg(long, default_value_t = 2)]
    pub frames_in_flight: usize,

    /// Present without waiting for vertical blank when the surface allows it
    #[arg(long)]
    pub no_vsync: bool,

    /// Record each swap chain image's commands once and replay them
    #[arg(long)]
    pub static_commands: bool,
}

pub struct App {
    options: AppOptions,
    window: Option<Arc<Window>>,
    demo: Option<DemoState>,

    // State
    request_redraws: bool,
    close_requested: bool,
    error: Option<Report>,
}

impl App {
    pub fn new(options: AppOptions) -> Self {
        Self {
            options,
            window: None,
            demo: None,

            request_redraws: true,
            close_requested: false,
            error: None,
        }
    }

    pub fn run(mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        event_loop.set_control_flow(ControlFlow::Poll);
        event_loop.run_app(&mut self)?;

        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: Report) {
        log::error!("{error:?}");
        self.error = Some(error);
        self.demo = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let attributes = Window::default_attributes().with_title("vkframe");
            match event_loop.create_window(attributes) {
                Ok(window) => self.window = Some(Arc::new(window)),
                Err(e) => return self.fail(event_loop, e.into()),
            }
        }

        if self.demo.is_none() {
            if let Some(window) = self.window.clone() {
                match DemoState::new(window, &self.options) {
                    Ok(demo) => self.demo = Some(demo),
                    Err(e) => self.fail(event_loop, e),
                }
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent
    ) {
        if self.window.as_ref().is_none_or(|window| window.id() != window_id) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(demo) = self.demo.as_mut() {
                    demo.resized();
                }
            }
            WindowEvent::RedrawRequested => {
                let result = match self.demo.as_mut() {
                    Some(demo) => demo.draw(),
                    None => Ok(()),
                };
                if let Err(e) = result {
                    self.fail(event_loop, e);
                }
            }
            WindowEvent::KeyboardInput {
                event:
                KeyEvent {
                    logical_key: key,
                    state: ElementState::Pressed,
                    ..
                },
                ..
            } => match key.as_ref() {
                Key::Character("r") => {
                    self.request_redraws = !self.request_redraws;
                    log::info!("request_redraws: {}", self.request_redraws);
                }
                Key::Character("i") => {
                    if let Some(demo) = self.demo.as_mut() {
                        demo.invalidate_commands();
                    }
                }
                Key::Character("c") => {
                    if let Some(demo) = self.demo.as_mut() {
                        demo.trim_caches();
                    }
                }
                Key::Named(NamedKey::Escape) => {
                    self.close_requested = true;
                }
                _ => {}
            },
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.close_requested {
            event_loop.exit();
            return;
        }

        if self.request_redraws {
            if let Some(window) = self.window.as_ref() {
                window.request_redraw();
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // GPU objects go before the window they present to
        self.demo = None;
    }
}
