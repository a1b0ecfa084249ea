use super::output::{emit, human_issues};
use super::{read_doc, AppContext, EXIT_OK, EXIT_REJECTED};
use anyhow::Result;
use clap::Args;
use pf_config::{validate_for, Template};
use pf_types::EngineKind;
use serde_json::json;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Only this engine (default: both)
    #[arg(short, long)]
    pub engine: Option<EngineKind>,
    /// Validate a template file instead of the stored template
    #[arg(long)]
    pub file: Option<PathBuf>,
}

pub fn run(ctx: &AppContext, args: ValidateArgs) -> Result<i32> {
    let engines: Vec<EngineKind> = match args.engine {
        Some(e) => vec![e],
        None => EngineKind::ALL.to_vec(),
    };
    let from_file: Option<Template> = match &args.file {
        Some(p) => Some(read_doc(p)?),
        None => None,
    };

    let mut reports = Vec::new();
    let mut total = 0;
    for engine in engines {
        let t = match &from_file {
            Some(t) => t.clone(),
            None => ctx.service.get_template(engine),
        };
        let errors = validate_for(&t, engine);
        total += errors.len();
        reports.push((engine, errors));
    }

    emit(
        ctx.json,
        || {
            reports
                .iter()
                .map(|(engine, errors)| {
                    if errors.is_empty() {
                        format!("{engine}: ok")
                    } else {
                        format!("{engine}:\n{}", human_issues(errors))
                    }
                })
                .collect::<Vec<_>>()
                .join("\n")
        },
        &json!({
            "ok": total == 0,
            "engines": reports
                .iter()
                .map(|(engine, errors)| json!({"engine": engine, "ok": errors.is_empty(), "errors": errors}))
                .collect::<Vec<_>>(),
        }),
    );
    Ok(if total == 0 { EXIT_OK } else { EXIT_REJECTED })
}
