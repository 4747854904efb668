// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::f32::consts::TAU;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use glam::{Mat4, Vec3};
use tracing::{debug, error, info};
use vela_core::{init_tracing, EngineConfig, PresentModePref, DEFAULT_CONFIG_PATH};
use vela_platform::{InputState, KeyCode, MouseButton, PlatformWindow};
use vela_render::{
    FrameStatus, FrameSynchronizer, MaterialPass, RenderSize, SurfaceProvider, Vertex,
    MAX_FRAMES_IN_FLIGHT,
};
use vela_render_vk::{PresentPreference, RendererOptions, ShaderPaths, VkRenderer};
use vela_scene::{NodeId, NodeKind, SceneGraph};

use vela_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::WindowId,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine config file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Disable validation layers even in debug builds
    #[arg(long)]
    no_validation: bool,
    /// Force FIFO presentation
    #[arg(long)]
    fifo: bool,
}

const TRI_VERTS: [Vertex; 3] = [
    Vertex {
        pos: [0.0, 0.6, 0.0],
        color: [1.0, 0.0, 0.0],
    },
    Vertex {
        pos: [-0.5, -0.4, 0.0],
        color: [0.0, 1.0, 0.0],
    },
    Vertex {
        pos: [0.5, -0.4, 0.0],
        color: [0.0, 0.0, 1.0],
    },
];
const TRI_INDICES: [u32; 3] = [0, 1, 2];

/// Radians per second while the spinner turns on its own.
const SPIN_RATE: f32 = 1.0;

/// Next spinner angle. Dragging with the left button maps cursor x across
/// the surface onto one full turn; holding Space freezes it.
fn spin_angle(angle: f32, dt: f32, input: &InputState, size: RenderSize) -> f32 {
    let next = if input.is_mouse_held(MouseButton::Left) && size.width > 0 {
        let (x, _) = input.cursor();
        (x / size.width as f32).clamp(0.0, 1.0) * TAU
    } else if input.is_key_held(KeyCode::Space) {
        angle
    } else {
        angle + dt * SPIN_RATE
    };
    next.rem_euclid(TAU)
}

fn renderer_options(cfg: &EngineConfig) -> RendererOptions {
    RendererOptions {
        app_name: cfg.window.title.clone(),
        validation: cfg.render.validation,
        validation_layers: cfg.render.validation_layers.clone(),
        present: match cfg.render.present_mode {
            PresentModePref::Mailbox => PresentPreference::Mailbox,
            PresentModePref::Fifo => PresentPreference::Fifo,
        },
        clear_color: cfg.render.clear_color,
        frames_in_flight: MAX_FRAMES_IN_FLIGHT,
        shaders: cfg.pipeline.as_ref().map(|p| ShaderPaths {
            vertex: p.vertex_shader.clone(),
            fragment: p.fragment_shader.clone(),
        }),
    }
}

struct App {
    cfg: EngineConfig,
    opts: RendererOptions,

    // renderer must drop before the window it presents to
    renderer: Option<VkRenderer>,
    window: Option<PlatformWindow>,
    sync: FrameSynchronizer,

    scene: SceneGraph,
    spinner: Option<NodeId>,
    angle: f32,
    last_tick: Instant,

    frames: u32,
    last_fps_instant: Instant,
    paused: bool,
    exiting: bool,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(cfg: EngineConfig) -> Self {
        let opts = renderer_options(&cfg);
        App {
            cfg,
            opts,
            renderer: None,
            window: None,
            sync: FrameSynchronizer::new(MAX_FRAMES_IN_FLIGHT),
            scene: SceneGraph::new(),
            spinner: None,
            angle: 0.0,
            last_tick: Instant::now(),
            frames: 0,
            last_fps_instant: Instant::now(),
            paused: false,
            exiting: false,
            fatal: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = PlatformWindow::new(
            event_loop,
            &self.cfg.window.title,
            self.cfg.window.width,
            self.cfg.window.height,
        )?;
        let size = window.drawable_size();
        let mut renderer = VkRenderer::new(window.window(), window.window(), size, &self.opts)
            .context("Vulkan init")?;
        // one ring entry per slot the renderer actually built
        self.sync = FrameSynchronizer::for_backend(&renderer);

        let mesh = renderer
            .upload_mesh(&TRI_VERTS, &TRI_INDICES)
            .context("triangle upload")?;
        let root = self.scene.add_root(NodeKind::Empty);
        self.scene.add_child(
            root,
            NodeKind::Mesh {
                mesh,
                pass: MaterialPass::Opaque,
            },
        )?;
        self.spinner = Some(root);

        if !renderer.has_pipeline() {
            info!("no [pipeline] configured, frames are clear-only");
        }
        info!("GPU: {}", renderer.device_name());

        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    /// Drains the GPU and releases the renderer before the window.
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        self.exiting = true;
        if let Some(renderer) = self.renderer.as_mut() {
            if let Err(e) = self.sync.shutdown(renderer) {
                error!("shutdown: {e:#}");
            }
        }
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("fatal: {err:#}");
        self.fatal = Some(err);
        self.shutdown(event_loop);
    }

    fn redraw(&mut self) -> Result<()> {
        let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_mut()) else {
            return Ok(());
        };

        let now = Instant::now();
        let dt = now.duration_since(self.last_tick).as_secs_f32();
        self.last_tick = now;
        if let Some(root) = self.spinner {
            self.angle = spin_angle(self.angle, dt, &window.state.input, window.drawable_size());
            self.scene
                .set_local_transform(root, Mat4::from_rotation_z(self.angle))?;
        }
        self.scene.refresh_world_transforms();

        // keep the triangle's proportions on non-square surfaces
        let extent = renderer.extent();
        let aspect = if extent.is_empty() {
            1.0
        } else {
            extent.height as f32 / extent.width as f32
        };
        let draws = self
            .scene
            .collect_draws(Mat4::from_scale(Vec3::new(aspect, 1.0, 1.0)));

        let status = self.sync.draw_frame(renderer, window, &draws)?;
        match status {
            FrameStatus::Presented { recreated, .. } => {
                if self.paused {
                    self.paused = false;
                    info!("surface restored, resuming");
                }
                if !recreated.is_empty() {
                    debug!(
                        "swapchain generation {} after {:?}",
                        renderer.swapchain_generation(),
                        recreated
                    );
                }
                self.frames = self.frames.saturating_add(1);
            }
            FrameStatus::Skipped => {}
            FrameStatus::Paused => {
                if !self.paused {
                    self.paused = true;
                    info!("surface is zero-sized, paused");
                }
            }
        }
        window.state.input.begin_frame();
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() && !self.exiting {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Wait);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(window) = self.window.as_mut() else {
            return;
        };
        if window_id != window.id() {
            return;
        }
        window.state.apply(&event);
        if window.state.input.was_key_pressed(KeyCode::Escape) && !window.state.close_requested() {
            info!("Escape pressed");
            window.state.request_close();
        }
        if window.state.close_requested() {
            self.shutdown(event_loop);
            return;
        }

        match event {
            WindowEvent::Resized(_) => window.request_redraw(),

            WindowEvent::RedrawRequested => {
                if self.exiting {
                    return;
                }
                if let Err(e) = self.redraw() {
                    self.fail(event_loop, e);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        event_loop.set_control_flow(ControlFlow::Wait);
        if self.paused {
            // a Resized event wakes us up again
            self.frames = 0;
            return;
        }
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = EngineConfig::load(&args.config)?;
    if args.no_validation {
        cfg.render.validation = false;
    }
    if args.fifo {
        cfg.render.present_mode = PresentModePref::Fifo;
    }
    info!(
        "present mode {:?}, validation {}",
        cfg.render.present_mode, cfg.render.validation
    );

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
