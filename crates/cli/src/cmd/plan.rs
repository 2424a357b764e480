//! Implementation of the `envbake plan` command.
//!
//! Parses and validates a descriptor, then prints the ordered steps with
//! their layer keys. Nothing is executed.

use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use envbake_lib::descriptor::parse_file;
use envbake_lib::materialize::BuildContext;
use envbake_lib::plan::{Layer, Plan};
use envbake_lib::util::hash::Hashable;

use crate::output::{OutputFormat, print_json, print_stat, short_hash};

#[derive(Serialize)]
struct PlanOutput<'a> {
  plan_hash: String,
  base: String,
  workdir: Option<&'a str>,
  steps: &'a [Layer],
}

pub fn cmd_plan(file: Option<&Path>, context: &Path, output: OutputFormat) -> Result<()> {
  let path = super::descriptor_path(file, context);

  let descriptor = parse_file(&path).with_context(|| format!("Failed to parse descriptor: {}", path.display()))?;
  let plan = Plan::from_descriptor(&descriptor).with_context(|| format!("Invalid descriptor: {}", path.display()))?;

  let context = BuildContext::open(context).context("Failed to open build context")?;
  let context_hash = context.content_hash().context("Failed to hash build context")?;
  let plan_hash = plan.compute_hash().context("Failed to compute plan hash")?;
  let layers = plan.layer_keys(&context_hash).context("Failed to compute layer keys")?;

  if output.is_json() {
    return print_json(&PlanOutput {
      plan_hash: plan_hash.0,
      base: plan.base.to_string(),
      workdir: plan.workdir.as_ref().map(|w| w.as_str()),
      steps: &layers,
    });
  }

  println!("Plan: {}", plan_hash);
  print_stat("Base", &plan.base.to_string());
  if let Some(workdir) = &plan.workdir {
    print_stat("Workdir", workdir.as_str());
  }
  print_stat("Context", &context.root().display().to_string());
  println!();

  for (i, layer) in layers.iter().enumerate() {
    println!(
      "{:>2}. {:<9} {} {}",
      i + 1,
      layer.stage.to_string(),
      layer.description,
      format!("({})", short_hash(&layer.key.0)).if_supports_color(Stream::Stdout, |s| s.dimmed())
    );
  }

  Ok(())
}
