// SPDX-License-Identifier: CEPL-1.0
use clap::Parser;
use kube_platform::{DEFAULT_HEIGHT, DEFAULT_TITLE, DEFAULT_WIDTH};
use kube_render_vk::{RendererOptions, ShaderSource, DEFAULT_CLEAR_COLOR};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML config; a missing file means defaults
    #[arg(long, default_value = "kube.toml")]
    pub config: PathBuf,
    /// Draw the cube only, without the FPS text
    #[arg(long)]
    pub no_overlay: bool,
    /// Load `<program>.{vert,frag}.spv` from here instead of the built-in shaders
    #[arg(long)]
    pub shader_dir: Option<PathBuf>,
    /// Binary PPM sampled on the cube
    #[arg(long)]
    pub texture: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            title: DEFAULT_TITLE.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub overlay: bool,
    pub shader_dir: Option<PathBuf>,
    pub texture: Option<PathBuf>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: DEFAULT_CLEAR_COLOR,
            overlay: true,
            shader_dir: None,
            texture: Some(PathBuf::from("assets/kube.ppm")),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
}

impl AppCfg {
    /// Command-line flags win over the file.
    pub fn renderer_options(&self, args: &Args, validation: bool) -> RendererOptions {
        let shaders = match args.shader_dir.as_ref().or(self.render.shader_dir.as_ref()) {
            Some(dir) => ShaderSource::Directory(dir.clone()),
            None => ShaderSource::Embedded,
        };
        RendererOptions {
            validation,
            overlay: self.render.overlay && !args.no_overlay,
            shaders,
            texture: args.texture.clone().or_else(|| self.render.texture.clone()),
            clear_color: self.render.clear_color,
        }
    }
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str::<AppCfg>(text)
}

/// Never fails: unreadable or malformed files fall back to defaults.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match parse_cfg(&s) {
            Ok(cfg) => {
                info!("config {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("config {}: {e}; using defaults", path.display());
                AppCfg::default()
            }
        },
        Err(e) => {
            debug!("config {}: {e}; using defaults", path.display());
            AppCfg::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        Args::parse_from(std::iter::once("kube").chain(extra.iter().copied()))
    }

    #[test]
    fn full_file() {
        let cfg = parse_cfg(
            r#"
            [window]
            width = 1024
            height = 768
            title = "spin"

            [render]
            clear_color = [0.0, 0.0, 0.0, 1.0]
            overlay = false
            shader_dir = "shaders"
            texture = "brick.ppm"
            "#,
        )
        .unwrap();
        assert_eq!(
            cfg.window,
            WindowCfg {
                width: 1024,
                height: 768,
                title: "spin".into()
            }
        );
        assert!(!cfg.render.overlay);
        assert_eq!(cfg.render.shader_dir, Some(PathBuf::from("shaders")));
        assert_eq!(cfg.render.texture, Some(PathBuf::from("brick.ppm")));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg = parse_cfg("[window]\nwidth = 320\n").unwrap();
        assert_eq!(cfg.window.width, 320);
        assert_eq!(cfg.window.height, 600);
        assert_eq!(cfg.window.title, "Kube Vulkan");
        assert_eq!(cfg.render, RenderCfg::default());
        assert_eq!(parse_cfg("").unwrap(), AppCfg::default());
    }

    #[test]
    fn malformed_or_missing_file_uses_defaults() {
        let dir = std::env::temp_dir();
        let bad = dir.join(format!("kube-bad-{}.toml", std::process::id()));
        fs::write(&bad, "[window\nwidth = ").unwrap();
        assert_eq!(load_cfg(&bad), AppCfg::default());
        assert_eq!(load_cfg(&dir.join("kube-does-not-exist.toml")), AppCfg::default());
    }

    #[test]
    fn flags_override_file() {
        let cfg = AppCfg {
            render: RenderCfg {
                shader_dir: Some("from-file".into()),
                ..Default::default()
            },
            ..Default::default()
        };

        let opts = cfg.renderer_options(&args(&[]), true);
        assert!(opts.validation);
        assert!(opts.overlay);
        assert_eq!(opts.shaders, ShaderSource::Directory("from-file".into()));
        assert_eq!(opts.texture, Some(PathBuf::from("assets/kube.ppm")));

        let opts = cfg.renderer_options(
            &args(&["--no-overlay", "--shader-dir", "cli", "--texture", "t.ppm"]),
            false,
        );
        assert!(!opts.validation);
        assert!(!opts.overlay);
        assert_eq!(opts.shaders, ShaderSource::Directory("cli".into()));
        assert_eq!(opts.texture, Some(PathBuf::from("t.ppm")));
    }

    #[test]
    fn no_shader_dir_means_embedded() {
        let opts = AppCfg::default().renderer_options(&args(&[]), true);
        assert_eq!(opts.shaders, ShaderSource::Embedded);
        assert_eq!(opts.clear_color, DEFAULT_CLEAR_COLOR);
    }
}
