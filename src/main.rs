// =============================================================================
// VK-TRIANGLE - Minimal Vulkan bootstrap
// =============================================================================
//
// Opens a window, brings up a Vulkan device, builds one fixed pipeline and
// draws a green triangle on a magenta background until the window closes.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (App)                                         │
// │    └── Renderer                                                 │
// │          └── Vulkan Device + Swapchain                          │
// │                └── Command Buffers (recorded once per image)    │
// │                      └── Frame loop (fences, semaphores)        │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for the slot's fence, then reset it
// 2. Acquire swapchain image
// 3. Submit the command buffer recorded for that image
// 4. Present rendered image to screen
// 5. Move to the next slot
//
// =============================================================================

mod backend;
mod config;
mod frame;
mod renderer;

use anyhow::Result;
use config::Config;
use renderer::Renderer;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<ExitCode> {
    init_logging();

    // Load configuration from config.toml
    let config = Config::load();

    log::info!("Starting vk-triangle");
    log::info!(
        "Window: {}x{} \"{}\"",
        config.window.width,
        config.window.height,
        config.window.title
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(app.exit_code())
}

/// `RUST_LOG` wins; otherwise info and up.
fn init_logging() {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Window plus renderer, driven by winit.
///
/// Field order matters for Drop: the renderer owns the surface and must go
/// before the window it was created for.
struct App {
    // ─────────────────────────────────────────────────────────────────────────
    // CONFIGURATION
    // ─────────────────────────────────────────────────────────────────────────
    config: Config,

    // ─────────────────────────────────────────────────────────────────────────
    // VULKAN + WINDOW
    // ─────────────────────────────────────────────────────────────────────────
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,

    // ─────────────────────────────────────────────────────────────────────────
    // STATE FLAGS
    // ─────────────────────────────────────────────────────────────────────────
    /// Set once a fatal error has been logged
    failed: bool,
    /// Earliest time of the next redraw when a frame delay is configured
    next_frame_at: Instant,

    // ─────────────────────────────────────────────────────────────────────────
    // FPS TRACKING
    // ─────────────────────────────────────────────────────────────────────────
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            config,
            renderer: None,
            window: None,
            failed: false,
            next_frame_at: now,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn exit_code(&self) -> ExitCode {
        if self.failed {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        }
    }

    /// Log a fatal error and leave the event loop.
    fn fail(&mut self, event_loop: &ActiveEventLoop, context: &str, error: &dyn std::fmt::Display) {
        log::error!("{}: {}", context, error);
        self.failed = true;
        event_loop.exit();
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    fn shutdown(&mut self) {
        if let Some(renderer) = self.renderer.take() {
            log::info!("Presented {} frames", renderer.frames_presented());
            // Dropping waits for the device, then releases everything
            drop(renderer);
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, "Failed to create window", &e);
                return;
            }
        };

        match Renderer::new(&window, &self.config) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                self.fail(event_loop, "Failed to initialize Vulkan", &format!("{:#}", e));
                return;
            }
        }

        self.window = Some(window);
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            // ─────────────────────────────────────────────────────────────────
            // CLOSE REQUEST
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            // ─────────────────────────────────────────────────────────────────
            // REDRAW REQUESTED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::RedrawRequested => {
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                match renderer.draw_frame() {
                    Ok(_) => self.update_fps(),
                    Err(e) => {
                        self.fail(event_loop, "Render error", &e);
                        // No further frame may run on the broken slot
                        self.shutdown();
                    }
                }
            }

            // ─────────────────────────────────────────────────────────────────
            // KEYBOARD INPUT
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Called when the event loop is about to block waiting for events.
    /// Redraw continuously, or on a timer when a frame delay is set.
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(ref window) = self.window else {
            return;
        };

        let delay = Duration::from_millis(self.config.graphics.frame_delay_ms);
        if delay.is_zero() {
            window.request_redraw();
            return;
        }

        let now = Instant::now();
        if now >= self.next_frame_at {
            window.request_redraw();
            self.next_frame_at = now + delay;
        }
        event_loop.set_control_flow(ControlFlow::WaitUntil(self.next_frame_at));
    }

    /// Drain the GPU and release every Vulkan object while the window lives.
    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}
