use super::output::store_failure;
use super::{AppContext, EXIT_OK};
use anyhow::{Context, Result};
use clap::Args;
use pf_types::EngineKind;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ImportArgs {
    #[arg(short, long)]
    pub engine: EngineKind,
    /// mihomo config.yaml or sing-box config.json
    pub artifact: PathBuf,
}

pub fn run(ctx: &AppContext, args: ImportArgs) -> Result<i32> {
    let text = std::fs::read_to_string(&args.artifact)
        .with_context(|| format!("read {}", args.artifact.display()))?;
    match ctx.service.import_artifact(args.engine, &text) {
        Ok(t) => {
            if ctx.json {
                println!("{}", serde_json::to_string_pretty(&t)?);
            } else {
                println!(
                    "imported {} group(s), {} rule(s), {} rule-set(s) into {}",
                    t.groups.len(),
                    t.rules.len(),
                    t.rule_sets.len(),
                    args.engine
                );
            }
            Ok(EXIT_OK)
        }
        Err(e) => store_failure(ctx.json, e),
    }
}
