//! Implementation of the `envbake build` command.
//!
//! Runs the full pipeline for a descriptor and, unless `--no-save` is given,
//! stores the snapshot and makes it current. A failing step is reported with
//! its error kind and the command exits non-zero.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;

use envbake_lib::bake::{BakeError, BakeOptions, bake};
use envbake_lib::config::BakeConfig;
use envbake_lib::descriptor::parse_file;
use envbake_lib::materialize::BuildContext;
use envbake_lib::pipeline::{PipelineState, StepReport};
use envbake_lib::plan::Plan;
use envbake_lib::resolve::DirectorySource;
use envbake_lib::snapshot::SnapshotStore;

use crate::output::{OutputFormat, format_size, print_error, print_json, print_stat, print_step, print_success, symbols};

pub struct BuildArgs {
  pub file: Option<PathBuf>,
  pub context: PathBuf,
  pub artifacts: Option<PathBuf>,
  pub index: Option<PathBuf>,
  pub no_save: bool,
  pub output: OutputFormat,
}

#[derive(Serialize)]
struct BuildOutput<'a> {
  state: PipelineState,
  snapshot_id: Option<&'a str>,
  content_hash: Option<&'a str>,
  packages: Option<&'a std::collections::BTreeMap<String, String>>,
  failed_step: Option<String>,
  error_kind: Option<&'static str>,
  error: Option<String>,
  steps: &'a [StepReport],
  transitions: &'a [PipelineState],
}

pub fn cmd_build(args: BuildArgs) -> Result<()> {
  let path = super::descriptor_path(args.file.as_deref(), &args.context);

  let descriptor = parse_file(&path).with_context(|| format!("Failed to parse descriptor: {}", path.display()))?;
  let plan = Plan::from_descriptor(&descriptor).with_context(|| format!("Invalid descriptor: {}", path.display()))?;

  let mut config = BakeConfig::load_default().context("Failed to load config")?;
  if let Some(dir) = args.artifacts {
    config = config.with_artifacts(dir);
  }
  if let Some(dir) = args.index {
    config = config.with_index(dir);
  }

  let source = DirectorySource::new(config.artifacts_dir());
  let mut installer = config.installer().context("Failed to configure installer")?;
  let context = BuildContext::open(&args.context).context("Failed to open build context")?;
  let store = SnapshotStore::default_store();

  let options = BakeOptions {
    descriptor_path: Some(std::path::absolute(&path).unwrap_or(path)),
    save: !args.no_save,
    ..BakeOptions::default()
  };

  info!(artifacts = %source.root().display(), "building");
  match bake(&plan, &source, installer.as_mut(), &context, &store, &options) {
    Ok(result) => {
      let id = result.saved.then_some(result.record.id.as_str());
      if args.output.is_json() {
        return print_json(&BuildOutput {
          state: PipelineState::Complete,
          snapshot_id: id,
          content_hash: Some(&result.record.content_hash.0),
          packages: Some(&result.record.packages),
          failed_step: None,
          error_kind: None,
          error: None,
          steps: &result.reports,
          transitions: &result.transitions,
        });
      }

      print_reports(&result.reports);
      println!();
      print_success(&format!("Baked {}", plan.base));
      print_stat("Snapshot", id.unwrap_or("not saved"));
      print_stat("Content hash", &result.record.content_hash.0);
      print_stat("Packages", &result.record.packages.len().to_string());
      print_stat(
        "Files",
        &format!(
          "{} ({})",
          result.record.file_count,
          format_size(result.record.total_bytes)
        ),
      );
      Ok(())
    }
    Err(BakeError::Pipeline {
      failure,
      reports,
      transitions,
    }) => {
      let kind = failure.error.kind();
      if args.output.is_json() {
        print_json(&BuildOutput {
          state: PipelineState::Failed,
          snapshot_id: None,
          content_hash: None,
          packages: None,
          failed_step: Some(failure.step.describe()),
          error_kind: Some(kind),
          error: Some(failure.error.to_string()),
          steps: &reports,
          transitions: &transitions,
        })?;
      } else {
        print_reports(&reports);
        print_error(&format!("{} {} {}", failure.step.describe(), symbols::ARROW, kind));
        eprintln!("  {}", failure.error);
      }
      bail!("build failed: {}", kind)
    }
    Err(err) => Err(err).context("Build failed"),
  }
}

fn print_reports(reports: &[StepReport]) {
  reports.iter().for_each(print_step);
}
