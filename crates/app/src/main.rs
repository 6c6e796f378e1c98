//! Vulkan Renderer - Main Entry Point
//!
//! Opens a window, uploads a textured quad and presents frames until the
//! window is closed.

use anyhow::Result;
use glam::{Vec2, Vec3};
use tracing::{debug, error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use renderer_core::{RendererConfig, Timer};
use renderer_platform::Window;
use renderer_renderer::{FramePacket, Renderer, RendererResult, Vertex3d};

const QUAD_VERTICES: [Vertex3d; 4] = [
    Vertex3d::new(Vec3::new(-0.5, -0.5, 0.0), Vec2::new(0.0, 0.0)),
    Vertex3d::new(Vec3::new(0.5, -0.5, 0.0), Vec2::new(1.0, 0.0)),
    Vertex3d::new(Vec3::new(0.5, 0.5, 0.0), Vec2::new(1.0, 1.0)),
    Vertex3d::new(Vec3::new(-0.5, 0.5, 0.0), Vec2::new(0.0, 1.0)),
];

const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

struct App {
    config: RendererConfig,
    // Dropped before the window it renders into
    renderer: Option<Renderer>,
    window: Option<Window>,
    timer: Timer,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            timer: Timer::new(),
        }
    }

    fn create_renderer(&self, window: &Window) -> RendererResult<Renderer> {
        let mut renderer = Renderer::new(window, &self.config)?;
        let quad = renderer.create_geometry(&QUAD_VERTICES, &QUAD_INDICES)?;
        debug!("Uploaded quad geometry {:?}", quad);
        Ok(renderer)
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match Window::new(
            event_loop,
            self.config.width,
            self.config.height,
            &self.config.application_name,
        ) {
            Ok(window) => window,
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        match self.create_renderer(&window) {
            Ok(renderer) => {
                info!("Initialization complete, entering main loop");
                self.renderer = Some(renderer);
                self.window = Some(window);
                self.timer.reset();
            }
            Err(e) => {
                error!("Failed to create renderer: {}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = self.window.as_mut() {
                    window.resize(size.width, size.height);
                }
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resized(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                let delta = self.timer.delta_secs();

                if let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_ref())
                {
                    if window.is_minimized() {
                        return;
                    }

                    let packet = FramePacket::with_perspective(window.aspect_ratio(), delta);
                    if let Err(e) = renderer.draw_frame(&packet) {
                        error!("Render error: {}", e);
                        event_loop.exit();
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        info!(
            "Rendered {} frames, {:.1} fps average",
            self.timer.frame_count(),
            self.timer.average_fps()
        );
        self.renderer = None;
    }
}

fn main() -> Result<()> {
    renderer_core::init_logging();
    info!("Starting Vulkan Renderer");

    let config = RendererConfig::from_env().unwrap_or_else(|e| {
        warn!("Ignoring renderer environment: {}", e);
        RendererConfig::default()
    });

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(())
}
