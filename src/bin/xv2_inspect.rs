//! xv2-inspect - inspect and round-trip XV2 asset files

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use xv2_tools_lib::config::CodecOptions;
use xv2_tools_lib::registry::{Asset, FormatTag, ImportContext, Registry};
use xv2_tools_lib::skeleton::esk::decode_esk;

#[derive(Parser)]
#[command(name = "xv2-inspect")]
#[command(about = "Inspect and round-trip XV2 asset files")]
#[command(version)]
struct Cli {
    /// Codec options file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the format of a file and summarise its content
    Info {
        input: PathBuf,

        /// ESK skeleton that mesh bone names resolve against
        #[arg(short, long)]
        skeleton: Option<PathBuf>,
    },

    /// Decode then re-encode a file and report byte differences
    Roundtrip {
        input: PathBuf,

        /// Write the re-encoded bytes here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a codec options file
    Config { path: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let options = match &cli.config {
        Some(path) => CodecOptions::load(path)?,
        None => CodecOptions::default(),
    };
    let registry = Registry::new(options);

    match cli.command {
        Commands::Info { input, skeleton } => {
            let skeleton = match skeleton {
                Some(path) => {
                    let bytes = read(&path)?;
                    let esk = decode_esk(&bytes)
                        .with_context(|| format!("Failed to decode skeleton {:?}", path))?;
                    Some(esk.value.skeleton)
                }
                None => None,
            };
            let bytes = read(&input)?;
            let tag = detect(&input, &bytes)?;
            let mut ctx = ImportContext::new(input.to_string_lossy());
            if let Some(skeleton) = &skeleton {
                ctx = ctx.with_skeleton(skeleton);
            }
            let decoded = registry
                .import(tag, &bytes, &mut ctx)
                .with_context(|| format!("Failed to decode {:?} as {}", input, tag))?;
            println!("{}: {} ({} bytes)", input.display(), tag, bytes.len());
            println!("  {}", decoded.value.summary());
            print_details(&decoded.value);
            for warning in decoded.warnings.iter() {
                println!("  warning: {}", warning);
            }
        }

        Commands::Roundtrip { input, output } => {
            let bytes = read(&input)?;
            let tag = detect(&input, &bytes)?;
            let mut ctx = ImportContext::new(input.to_string_lossy());
            let decoded = registry
                .import(tag, &bytes, &mut ctx)
                .with_context(|| format!("Failed to decode {:?} as {}", input, tag))?;
            let encoded = registry
                .export(tag, &decoded.value)
                .with_context(|| format!("Failed to re-encode {:?}", input))?;

            match first_difference(&bytes, &encoded) {
                None => tracing::info!("{:?}: {} bytes, identical", input, bytes.len()),
                Some(offset) => tracing::info!(
                    "{:?}: differs from offset {:#x} ({} -> {} bytes)",
                    input,
                    offset,
                    bytes.len(),
                    encoded.len()
                ),
            }
            if let Some(output) = output {
                std::fs::write(&output, &encoded)
                    .with_context(|| format!("Failed to write {:?}", output))?;
                tracing::info!("Wrote {:?}", output);
            }
        }

        Commands::Config { path } => {
            let options = CodecOptions::load(&path)?;
            println!("{}", options.to_json_pretty()?);
            tracing::info!("Options file is valid!");
        }
    }

    Ok(())
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))
}

fn detect(path: &Path, bytes: &[u8]) -> Result<FormatTag> {
    FormatTag::detect(bytes)
        .or_else(|| FormatTag::from_path(path))
        .with_context(|| format!("Unknown asset format: {:?}", path))
}

fn first_difference(a: &[u8], b: &[u8]) -> Option<usize> {
    a.iter()
        .zip(b)
        .position(|(x, y)| x != y)
        .or_else(|| (a.len() != b.len()).then(|| a.len().min(b.len())))
}

fn print_details(asset: &Asset) {
    match asset {
        Asset::Skeleton(esk) => {
            for (index, bone) in esk.skeleton.bones.iter().enumerate() {
                println!("  [{index:3}] {} parent={:?}", bone.name, bone.parent);
            }
        }
        Asset::Mesh(emd) => {
            for model in &emd.models {
                for mesh in &model.meshes {
                    for sub in &mesh.submeshes {
                        println!(
                            "  {}/{}/{}: {} vertices, {} faces, {} sharp edges",
                            model.name,
                            mesh.name,
                            sub.name,
                            sub.vertices.len(),
                            sub.faces().len(),
                            sub.sharp_edges.len()
                        );
                    }
                }
            }
        }
        Asset::Textures(emb) => {
            for entry in &emb.entries {
                println!(
                    "  [{}] {} -> {} ({}, {} variants)",
                    entry.index,
                    entry.entry_name,
                    entry.name,
                    entry.payload.describe(),
                    entry.variants.len()
                );
            }
        }
        Asset::Animation(ean) => {
            for clip in &ean.clips {
                println!(
                    "  [{}] {}: {} frames, {} nodes",
                    clip.index,
                    clip.name,
                    clip.frame_count,
                    clip.nodes.len()
                );
            }
        }
        Asset::Materials(emm) => {
            for material in &emm.materials {
                println!(
                    "  {} ({}): {} params",
                    material.name,
                    material.shader,
                    material.params.len()
                );
            }
        }
    }
}
