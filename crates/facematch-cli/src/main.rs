use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facematch_core::{FaceRecognition, ImagePixels, OnnxFaceRecognition};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facematch", about = "Compare and inspect faces in local image files")]
struct Cli {
    /// Directory containing det_10g.onnx and w600k_r50.onnx
    #[arg(long, env = "FACEMATCH_MODEL_DIR", default_value_os_t = facematch_core::default_model_dir())]
    model_dir: PathBuf,

    /// ONNX Runtime intra-op threads per model
    #[arg(long, default_value_t = 2)]
    threads: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide whether two images show the same face
    Compare {
        first: PathBuf,
        second: PathBuf,
    },
    /// List the faces found in an image
    Detect {
        image: PathBuf,
    },
}

fn load_image(recognition: &OnnxFaceRecognition, path: &Path) -> Result<ImagePixels> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    recognition
        .decode_image(&bytes)
        .with_context(|| format!("decoding {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut recognition = OnnxFaceRecognition::load(&cli.model_dir, cli.threads.max(1))
        .with_context(|| format!("loading models from {}", cli.model_dir.display()))?;

    match cli.command {
        Commands::Compare { first, second } => {
            let image1 = load_image(&recognition, &first)?;
            let image2 = load_image(&recognition, &second)?;

            let encoding1 = recognition
                .extract_face_encoding(&image1)
                .with_context(|| format!("encoding {}", first.display()))?;
            let encoding2 = recognition
                .extract_face_encoding(&image2)
                .with_context(|| format!("encoding {}", second.display()))?;

            let result = recognition.compare_detailed(&encoding1, &encoding2);
            println!(
                "{}",
                serde_json::json!({
                    "matched": result.matched,
                    "similarity": result.similarity,
                })
            );
        }
        Commands::Detect { image } => {
            let pixels = load_image(&recognition, &image)?;
            let faces = recognition
                .detect(&pixels)
                .with_context(|| format!("detecting faces in {}", image.display()))?;
            tracing::info!(count = faces.len(), "detection finished");
            println!("{}", serde_json::to_string_pretty(&faces)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_compare() {
        let cli = Cli::try_parse_from([
            "facematch",
            "--model-dir",
            "/opt/models",
            "compare",
            "a.jpg",
            "b.png",
        ])
        .unwrap();
        assert_eq!(cli.model_dir, PathBuf::from("/opt/models"));
        match cli.command {
            Commands::Compare { first, second } => {
                assert_eq!(first, PathBuf::from("a.jpg"));
                assert_eq!(second, PathBuf::from("b.png"));
            }
            Commands::Detect { .. } => panic!("expected compare"),
        }
    }

    #[test]
    fn test_compare_requires_two_images() {
        assert!(Cli::try_parse_from(["facematch", "compare", "a.jpg"]).is_err());
    }
}
