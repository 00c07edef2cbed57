// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::{load_cfg, AppCfg, Args};
use kube_core::{env_flag, init_tracing};
use kube_platform::{is_drawable, map_key, KeyAction};
use kube_render::{RenderSize, Renderer};
use kube_render_vk::{RendererOptions, VkRenderer, VALIDATION_ENV};
use std::time::Instant;
use tracing::{debug, error, info};

use kube_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    raw_window_handle::{HasDisplayHandle, HasWindowHandle},
    window::{Window, WindowId},
};

struct App {
    cfg: AppCfg,
    opts: RendererOptions,
    // Renderer before window: the surface must go before the window it was made from.
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    render_size: RenderSize,

    paused: bool,
    exiting: bool,
    fatal: Option<anyhow::Error>,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg, opts: RendererOptions) -> Self {
        App {
            cfg,
            opts,
            renderer: None,
            window: None,
            render_size: RenderSize::default(),
            paused: false,
            exiting: false,
            fatal: None,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn drawable(&self) -> bool {
        !self.render_size.is_empty()
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.fatal = Some(e);
        self.shutdown(event_loop);
    }

    /// The swapchain needs a real extent, so creation waits for a nonzero framebuffer.
    fn ensure_renderer(&mut self) -> Result<()> {
        if self.renderer.is_some() {
            return Ok(());
        }
        let Some(window) = &self.window else {
            return Ok(());
        };
        let size = window.inner_size();
        if !is_drawable(size) {
            debug!("framebuffer {}x{}, waiting", size.width, size.height);
            return Ok(());
        }
        self.render_size = RenderSize::new(size.width, size.height);

        let wh = window.window_handle().context("window handle")?;
        let dh = window.display_handle().context("display handle")?;
        let renderer = VkRenderer::new(&wh, &dh, self.render_size, self.opts.clone())?;
        self.renderer = Some(renderer);
        window.request_redraw();
        Ok(())
    }

    fn create_window(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(PhysicalSize::new(self.cfg.window.width, self.cfg.window.height));
        let window = event_loop.create_window(attrs).context("create window")?;
        let size = window.inner_size();
        self.render_size = RenderSize::new(size.width, size.height);
        self.window = Some(window);
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create_window(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }
        if let Err(e) = self.ensure_renderer() {
            self.fail(event_loop, e);
            return;
        }
        info!(
            "resumed → {}x{} (renderer {})",
            self.render_size.width,
            self.render_size.height,
            if self.renderer.is_some() { "ready" } else { "deferred" }
        );
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::KeyboardInput { event, .. } => {
                match map_key(&event.logical_key, event.state, event.repeat) {
                    Some(KeyAction::Exit) => {
                        info!("Escape → exit");
                        self.shutdown(event_loop);
                    }
                    Some(KeyAction::TogglePause) => {
                        self.paused = !self.paused;
                        info!("paused={}", self.paused);
                    }
                    None => {}
                }
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize::new(new_size.width, new_size.height);
                info!(
                    "Resized → {}x{} (drawable={})",
                    new_size.width,
                    new_size.height,
                    self.drawable()
                );
                if self.renderer.is_none() {
                    if let Err(e) = self.ensure_renderer() {
                        self.fail(event_loop, e);
                    }
                } else if self.drawable() {
                    if let Some(r) = &mut self.renderer {
                        r.resize(self.render_size);
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused || !self.drawable() {
                    return;
                }
                if let Some(r) = &mut self.renderer {
                    match r.render() {
                        Ok(()) => self.frames = self.frames.saturating_add(1),
                        Err(e) => self.fail(event_loop, e.context("frame")),
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        if self.paused || !self.drawable() || self.renderer.is_none() {
            // Nothing to draw: sleep until the next event.
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            debug!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_cfg(&args.config);
    let opts = cfg.renderer_options(&args, env_flag(VALIDATION_ENV, true));
    info!(
        "validation={} overlay={} shaders={:?}",
        opts.validation, opts.overlay, opts.shaders
    );

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg, opts);
    event_loop.run_app(&mut app)?;

    // Orderly teardown on every path out of the loop.
    app.renderer = None;
    app.window = None;
    match app.fatal.take() {
        Some(e) => Err(e),
        None => {
            info!("clean exit");
            Ok(())
        }
    }
}
