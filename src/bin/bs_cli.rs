//! `bs-cli`: a thin, non-core wrapper over the [`silverhalide`] library (§6 "CLI surface").
//!
//! ```text
//! bs-cli [files...] --preset <dsl-or-path> [--output <path-or-dir>]
//! ```
//!
//! This binary owns everything the library deliberately doesn't: argv parsing, config file/env
//! overlay, and raw pixel-buffer file I/O. The library itself never touches the filesystem or the
//! environment (§1/§9a).

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use log::{error, info};

use silverhalide::backend::BackendSet;
use silverhalide::config::EngineConfig;
use silverhalide::filters::FilterKind;
use silverhalide::format::PixelFormat;
use silverhalide::geometry::Rect;
use silverhalide::image::Image;
use silverhalide::layer::Layer;
use silverhalide::scheduler::RenderTarget;
use silverhalide::session::Session;
use silverhalide::{presets_load, Error};

/// Header of the minimal raw pixel container this wrapper reads/writes: `b"BSRW"`, a format tag
/// (matching [`PixelFormat`]'s declaration order), then `width: u32`, `height: u32`, little-endian,
/// followed by tightly packed pixel bytes. Real photographic codecs are outside the core's scope
/// (§6 "Image I/O boundary") — this is a deliberately minimal stand-in so the wrapper is
/// exercisable end to end without pulling in a decoder dependency the engine itself has no use for.
const MAGIC: &[u8; 4] = b"BSRW";

fn format_tag(format: PixelFormat) -> u8 {
    match format {
        PixelFormat::Mono8 => 0,
        PixelFormat::Mono16 => 1,
        PixelFormat::Mono16S => 2,
        PixelFormat::Mono32F => 3,
        PixelFormat::RGB8 => 4,
        PixelFormat::RGB16 => 5,
        PixelFormat::RGB16S => 6,
        PixelFormat::RGB32F => 7,
        PixelFormat::RGBA8 => 8,
        PixelFormat::RGBA16 => 9,
        PixelFormat::RGBA16S => 10,
        PixelFormat::RGBA32F => 11,
    }
}

fn format_from_tag(tag: u8) -> Option<PixelFormat> {
    Some(match tag {
        0 => PixelFormat::Mono8,
        1 => PixelFormat::Mono16,
        2 => PixelFormat::Mono16S,
        3 => PixelFormat::Mono32F,
        4 => PixelFormat::RGB8,
        5 => PixelFormat::RGB16,
        6 => PixelFormat::RGB16S,
        7 => PixelFormat::RGB32F,
        8 => PixelFormat::RGBA8,
        9 => PixelFormat::RGBA16,
        10 => PixelFormat::RGBA16S,
        11 => PixelFormat::RGBA32F,
        _ => return None,
    })
}

fn load_raw(path: &Path) -> Result<Layer, String> {
    let bytes = fs::read(path).map_err(|e| format!("reading {}: {}", path.display(), e))?;
    if bytes.len() < 13 || &bytes[0..4] != MAGIC {
        return Err(format!("{}: not a BSRW file", path.display()));
    }
    let format = format_from_tag(bytes[4]).ok_or_else(|| format!("{}: unknown format tag", path.display()))?;
    let width = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
    let height = u32::from_le_bytes([bytes[9], bytes[10], bytes[11], bytes[12]]);
    let pixels = &bytes[13..];
    let expected = format.stride_for_width(width) * height as usize;
    if pixels.len() < expected {
        return Err(format!("{}: truncated pixel data", path.display()));
    }
    let layer = Layer::new(path.display().to_string(), format, width, height);
    let backends = BackendSet::cpu_only();
    layer
        .update_data_for_backend(&backends.cpu, &pixels[..expected], Rect::full(width, height))
        .map_err(|e| format!("{}: {}", path.display(), e))?;
    Ok(layer)
}

fn save_raw(path: &Path, layer: &Layer, backends: &BackendSet) -> Result<(), String> {
    let format = layer.format();
    let width = layer.width();
    let height = layer.height();
    let mut out = Vec::with_capacity(13 + format.stride_for_width(width) * height as usize);
    out.extend_from_slice(MAGIC);
    out.push(format_tag(format));
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&height.to_le_bytes());
    let mut pixels = vec![0u8; format.stride_for_width(width) * height as usize];
    layer.retrieve(backends, &mut pixels, Rect::full(width, height)).map_err(|e| e.to_string())?;
    out.extend_from_slice(&pixels);
    fs::write(path, out).map_err(|e| format!("writing {}: {}", path.display(), e))
}

struct Args {
    files: Vec<PathBuf>,
    preset: String,
    output: Option<PathBuf>,
}

fn parse_args(argv: &[String]) -> Result<Args, String> {
    let mut files = Vec::new();
    let mut preset = None;
    let mut output = None;
    let mut i = 0;
    while i < argv.len() {
        match argv[i].as_str() {
            "--preset" => {
                i += 1;
                preset = Some(argv.get(i).ok_or("--preset requires a value")?.clone());
            }
            "--output" => {
                i += 1;
                output = Some(PathBuf::from(argv.get(i).ok_or("--output requires a value")?));
            }
            other => files.push(PathBuf::from(other)),
        }
        i += 1;
    }
    Ok(Args {
        files,
        preset: preset.ok_or("missing required --preset")?,
        output,
    })
}

/// Loads the engine's tunables: built-in defaults, layered with an optional `bs-cli.toml` in the
/// current directory and `BSCLI_*` environment overrides (§9a — only this wrapper reads files or
/// the environment; the core library never does).
fn load_config() -> EngineConfig {
    let mut settings = config::Config::default();
    let mut built = EngineConfig::default();
    if settings.merge(config::File::with_name("bs-cli").required(false)).is_ok()
        && settings.merge(config::Environment::with_prefix("BSCLI")).is_ok()
    {
        if let Ok(budget) = settings.get_int("preview_budget") {
            built.preview_budget = budget.max(1) as u32;
        }
        if let Ok(quality) = settings.get_float("preview_quality") {
            built = built.with_preview_quality(quality as f32);
        }
        if let Ok(fps) = settings.get_float("max_fps") {
            built.max_fps = fps as f32;
        }
    }
    built
}

fn preset_text(spec: &str) -> Result<String, String> {
    let path = Path::new(spec);
    if path.is_file() {
        fs::read_to_string(path).map_err(|e| format!("reading preset file {}: {}", spec, e))
    } else {
        Ok(spec.to_string())
    }
}

fn run(args: Args) -> Result<(), String> {
    let text = preset_text(&args.preset)?;
    let collection = presets_load(&text).map_err(|e| format!("parsing preset: {}", e))?;

    for input in &args.files {
        let source = load_raw(input)?;
        let format = source.format();
        let (width, height) = (source.width(), source.height());
        let image = Image::from_source_layer(source);
        let backends = BackendSet::cpu_only();
        let mut session =
            Session::create(image, backends, load_config()).map_err(|e: Error| format!("creating session: {}", e))?;

        for preset in collection.iter() {
            let kind = FilterKind::from_dsl_name(&preset.filter_name)
                .ok_or_else(|| format!("unknown filter in preset: {}", preset.filter_name))?;
            session.set_filter_parameters(kind, preset).map_err(|e| format!("applying preset: {}", e))?;
            session.enable_filter(kind, true);
        }

        session
            .request_render(Rect::full(width, height), RenderTarget::Final)
            .map_err(|e| format!("rendering {}: {}", input.display(), e))?;

        let out_path = match &args.output {
            Some(p) if p.is_dir() => p.join(input.file_name().ok_or("input has no file name")?),
            Some(p) => p.clone(),
            None => input.with_extension("out.bsrw"),
        };
        let backends_for_save = BackendSet::cpu_only();
        save_raw(&out_path, session.output(RenderTarget::Final), &backends_for_save)?;
        info!("wrote {} ({:?}, {}x{})", out_path.display(), format, width, height);
    }
    Ok(())
}

fn main() -> ExitCode {
    pretty_env_logger::init();
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&argv) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("bs-cli: {}", message);
            return ExitCode::FAILURE;
        }
    };
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("{}", message);
            ExitCode::FAILURE
        }
    }
}
