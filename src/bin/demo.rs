use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

use rgbd_pose_eval::checkpoint::{apply_checkpoint, load_checkpoint};
use rgbd_pose_eval::config::{Config, DatasetVariant};
use rgbd_pose_eval::dataset::{ClassTable, DirFrameSource, FrameSource, PrefetchSource};
use rgbd_pose_eval::eval::{Evaluator, TargetObject};
use rgbd_pose_eval::pose::{CentroidVoter, OnnxPoseNet};

/// Evaluate a trained pose network over recorded RGB-D frames.
#[derive(Parser)]
#[command(name = "demo", about = "Run pose evaluation over recorded frames")]
struct Cli {
    /// Path to TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Dataset variant: ycb or linemod
    #[arg(long)]
    dataset: Option<String>,

    /// Target object name (single-object datasets only)
    #[arg(long)]
    cls: Option<String>,

    /// Checkpoint base path (archive suffix is appended)
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// ONNX model path
    #[arg(long, default_value = "models/pose_net.onnx")]
    model: PathBuf,

    /// Directory of recorded .frame files
    #[arg(long)]
    frame_dir: Option<PathBuf>,

    /// Disable the preview window
    #[arg(long)]
    no_viewer: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    println!("pose-eval ({})", env!("GIT_VERSION"));

    let mut config = Config::load_or_default(&cli.config);

    // CLIの上書き
    if let Some(dataset) = &cli.dataset {
        config.dataset.variant = match dataset.as_str() {
            "ycb" => DatasetVariant::Ycb,
            "linemod" => DatasetVariant::Linemod,
            other => bail!("unknown dataset '{}' (expected 'ycb' or 'linemod')", other),
        };
    }
    if let Some(dir) = &cli.frame_dir {
        config.dataset.frame_dir = dir.to_string_lossy().into_owned();
    }
    if let Some(checkpoint) = &cli.checkpoint {
        config.eval.checkpoint = checkpoint.to_string_lossy().into_owned();
    }
    if cli.no_viewer {
        config.eval.show_viewer = false;
    }

    let target = match config.dataset.variant {
        DatasetVariant::Linemod => {
            let name = cli.cls.as_deref().context("--cls is required for linemod")?;
            Some(TargetObject::from_name(name)?)
        }
        DatasetVariant::Ycb => None,
    };

    println!("dataset: {:?}", config.dataset.variant);
    println!("frames:  {}", config.dataset.frame_dir);
    println!("output:  {}", config.eval.vis_dir);

    // 単一オブジェクト変種は対応表を引かない
    let table = match config.dataset.variant {
        DatasetVariant::Ycb => ClassTable::load(Path::new(&config.dataset.class_list))?,
        DatasetVariant::Linemod => ClassTable::from_lines(""),
    };

    println!("Loading model from {}...", cli.model.display());
    let mut net = OnnxPoseNet::new(&cli.model)?;
    println!("Model loaded");

    match load_checkpoint(Path::new(&config.eval.checkpoint))? {
        Some(bundle) => {
            apply_checkpoint(&bundle, &mut net, None)?;
            println!("checkpoint epoch {} (it {})", bundle.epoch, bundle.it);
        }
        None => {
            eprintln!("warning: evaluating with untrained weights");
        }
    }

    let source = DirFrameSource::open(Path::new(&config.dataset.frame_dir))?;
    let mut source: Box<dyn FrameSource> = if config.eval.prefetch > 0 {
        Box::new(PrefetchSource::start(source, config.eval.prefetch))
    } else {
        Box::new(source)
    };

    let mut evaluator = Evaluator::new(
        &config,
        Box::new(net),
        Box::new(CentroidVoter),
        table,
        target,
    )?;
    let done = evaluator.run(source.as_mut())?;
    println!("Evaluated {} frames", done);
    Ok(())
}
