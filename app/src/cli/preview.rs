use super::output::{emit, generation_failure, human_warnings};
use super::{AppContext, EXIT_OK};
use anyhow::{Context, Result};
use clap::Args;
use pf_types::EngineKind;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct PreviewArgs {
    #[arg(short, long)]
    pub engine: EngineKind,
    /// Compare against an earlier artifact and list the changed lines
    #[arg(long)]
    pub diff: Option<PathBuf>,
}

pub fn run(ctx: &AppContext, args: PreviewArgs) -> Result<i32> {
    let engine = args.engine;
    if let Some(prev) = &args.diff {
        let before = std::fs::read_to_string(prev)
            .with_context(|| format!("read {}", prev.display()))?;
        let d = match ctx.service.diff(engine, &before) {
            Ok(d) => d,
            Err(e) => return generation_failure(ctx.json, e),
        };
        emit(
            ctx.json,
            || {
                if d.changed {
                    format!("{} line(s) differ: {:?}", d.lines.len(), d.lines)
                } else {
                    "no changes".to_string()
                }
            },
            &d,
        );
        return Ok(EXIT_OK);
    }

    let r = match ctx.service.preview(engine) {
        Ok(r) => r,
        Err(e) => return generation_failure(ctx.json, e),
    };
    if ctx.json {
        emit(true, String::new, &r);
    } else {
        print!("{}", r.text);
        if !r.text.ends_with('\n') {
            println!();
        }
        if !r.warnings.is_empty() {
            eprintln!("{}", human_warnings(&r.warnings));
        }
    }
    Ok(EXIT_OK)
}
