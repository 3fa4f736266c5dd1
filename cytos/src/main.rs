use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::info;

use cytos::pipeline::load_frame_list;
use cytos::{FrameFiles, Pipeline, PipelineConfig, group_file_stems};

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let [config_path, frames_path, output_dir] = args.as_slice() else {
        bail!("usage: cytos <config.yaml> <frames.yaml|json|frame-dir> <output-dir>");
    };

    common::log_setup::setup_logging("info", Path::new("logs"), "cytos")?;

    let config = PipelineConfig::from_file(Path::new(config_path))
        .with_context(|| format!("Invalid configuration {config_path}"))?;
    let pipeline = Pipeline::new(config)?;
    let executor = pipeline.executor()?;

    let frames_path = Path::new(frames_path);
    let output = if frames_path.is_dir() {
        let files = FrameFiles::from_dir(frames_path)?;
        info!(frames = files.paths().len(), dir = %frames_path.display(), "Found frame files");
        pipeline.run(files, &executor)?
    } else {
        let frames = load_frame_list(frames_path)?;
        info!(frames = frames.len(), "Loaded frames");
        pipeline.run(frames, &executor)?
    };

    let output_dir = PathBuf::from(output_dir);
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let tables = output.table.split_by_group();
    let stems = group_file_stems(tables.keys().map(String::as_str));
    for ((group, table), stem) in tables.iter().zip(stems) {
        let path = output_dir.join(format!("{stem}.json"));
        table.save(&path)?;
        info!(group = %group, rows = table.n_rows(), path = %path.display(), "Wrote table");
    }

    info!(
        rows = output.stats.rows,
        elapsed_secs = output.stats.elapsed_secs,
        "Done"
    );
    Ok(())
}
