use super::output::{emit, store_failure};
use super::{read_doc, AppContext, EXIT_OK};
use anyhow::Result;
use clap::{Args, Subcommand};
use pf_config::presets::presets;
use pf_config::{ProxyGroup, Rule, RuleSet, Template};
use pf_core::StoreError;
use pf_types::EngineKind;
use serde_json::json;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct TemplateArgs {
    #[command(subcommand)]
    pub command: TemplateCommands,
}

#[derive(Subcommand, Debug)]
pub enum TemplateCommands {
    /// Print the stored template
    Show {
        #[arg(short, long)]
        engine: EngineKind,
    },
    /// Discard edits and restore the built-in defaults
    Reset {
        #[arg(short, long)]
        engine: EngineKind,
    },
    /// List available presets
    Presets,
    /// Replace a template with a preset
    Preset { id: String },
    /// Replace all groups with the list in FILE
    ReplaceGroups {
        #[arg(short, long)]
        engine: EngineKind,
        file: PathBuf,
    },
    /// Replace all rules with the list in FILE (multi-line payloads are expanded)
    ReplaceRules {
        #[arg(short, long)]
        engine: EngineKind,
        file: PathBuf,
    },
    /// Replace all rule-sets with the list in FILE
    ReplaceRuleSets {
        #[arg(short, long)]
        engine: EngineKind,
        file: PathBuf,
    },
}

pub fn run(ctx: &AppContext, args: TemplateArgs) -> Result<i32> {
    let svc = &ctx.service;
    let outcome: Result<(EngineKind, Template), StoreError> = match args.command {
        TemplateCommands::Show { engine } => Ok((engine, svc.get_template(engine))),
        TemplateCommands::Reset { engine } => svc.reset_template(engine).map(|t| (engine, t)),
        TemplateCommands::Presets => {
            let list = presets();
            emit(
                ctx.json,
                || {
                    list.iter()
                        .map(|p| format!("{:<18} {:<8} {}", p.id, p.engine.as_str(), p.description))
                        .collect::<Vec<_>>()
                        .join("\n")
                },
                &json!(list
                    .iter()
                    .map(|p| json!({"id": p.id, "engine": p.engine, "description": p.description}))
                    .collect::<Vec<_>>()),
            );
            return Ok(EXIT_OK);
        }
        TemplateCommands::Preset { id } => svc.apply_preset(&id),
        TemplateCommands::ReplaceGroups { engine, file } => {
            let groups: Vec<ProxyGroup> = read_doc(&file)?;
            svc.replace_groups(engine, groups).map(|t| (engine, t))
        }
        TemplateCommands::ReplaceRules { engine, file } => {
            let rules: Vec<Rule> = read_doc(&file)?;
            svc.replace_rules(engine, rules).map(|t| (engine, t))
        }
        TemplateCommands::ReplaceRuleSets { engine, file } => {
            let rule_sets: Vec<RuleSet> = read_doc(&file)?;
            svc.replace_rule_sets(engine, rule_sets).map(|t| (engine, t))
        }
    };

    match outcome {
        Ok((engine, t)) => {
            print_template(ctx.json, engine, &t)?;
            Ok(EXIT_OK)
        }
        Err(e) => store_failure(ctx.json, e),
    }
}

fn print_template(json_mode: bool, engine: EngineKind, t: &Template) -> Result<()> {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(t)?);
        return Ok(());
    }
    println!(
        "{engine}: {} group(s), {} rule(s), {} rule-set(s)",
        t.groups.len(),
        t.rules.len(),
        t.rule_sets.len()
    );
    for g in &t.groups {
        let state = if g.enabled { "" } else { " (disabled)" };
        println!("  group {:<12} {:?}{state}", g.tag, g.kind);
    }
    for (i, r) in t.rules.iter().enumerate() {
        let payload = if r.condition.payload.is_empty() {
            format!("{} sub-condition(s)", r.condition.rules.len())
        } else {
            r.condition.payload.clone()
        };
        println!("  rule {i:>3} {:?} {payload} -> {}", r.condition.kind, r.target);
    }
    for rs in &t.rule_sets {
        let src = rs.url.as_deref().or(rs.local_path.as_deref()).unwrap_or("-");
        println!("  rule-set {:<24} {src}", rs.tag);
    }
    Ok(())
}
