use super::output::{emit, exit_for};
use super::AppContext;
use anyhow::Result;
use clap::{Args, Subcommand};
use pf_core::{RefreshState, RuleSetStatus};
use pf_types::EngineKind;
use serde_json::json;

#[derive(Args, Debug)]
pub struct RulesetArgs {
    #[command(subcommand)]
    pub command: RulesetCommands,
}

#[derive(Subcommand, Debug)]
pub enum RulesetCommands {
    /// Download remote rule-sets into the rule-set directory
    Refresh {
        #[arg(short, long)]
        engine: EngineKind,
        /// Only this rule-set
        #[arg(long)]
        tag: Option<String>,
    },
}

pub async fn run(ctx: &AppContext, args: RulesetArgs) -> Result<i32> {
    match args.command {
        RulesetCommands::Refresh { engine, tag } => {
            let statuses = match tag {
                Some(tag) => vec![ctx.service.refresh_rule_set(engine, &tag).await?],
                None => ctx.service.refresh_all_rule_sets(engine).await?,
            };
            let ok = statuses.iter().all(|s| s.state == RefreshState::Completed);
            emit(
                ctx.json,
                || human(&statuses, &ctx.config.rule_set_dir().display().to_string()),
                &json!({"engine": engine, "ok": ok, "ruleSets": statuses}),
            );
            Ok(exit_for(ok))
        }
    }
}

fn human(statuses: &[RuleSetStatus], dir: &str) -> String {
    let mut out: Vec<String> = statuses
        .iter()
        .map(|s| match (&s.state, &s.error) {
            (_, Some(e)) => format!("  {:<28} failed: {e}", s.tag),
            (RefreshState::Completed, None) => {
                format!("  {:<28} {} bytes", s.tag, s.size.unwrap_or(0))
            }
            (state, None) => format!("  {:<28} {state:?}", s.tag),
        })
        .collect();
    let failed = statuses
        .iter()
        .filter(|s| s.state == RefreshState::Failed)
        .count();
    out.push(format!(
        "{} rule-set(s), {failed} failed -> {dir}",
        statuses.len()
    ));
    out.join("\n")
}
