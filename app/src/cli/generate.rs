use super::output::{emit, generation_failure, human_warnings};
use super::{read_doc, AppContext, EXIT_OK, EXIT_REJECTED};
use anyhow::Result;
use clap::Args;
use pf_config::GenerationOptions;
use pf_core::GenerateError;
use pf_types::ports::Verdict;
use pf_types::EngineKind;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct GenerateArgs {
    #[arg(short, long)]
    pub engine: EngineKind,
    /// Generation options (JSON/YAML) replacing those from the app config
    #[arg(long)]
    pub options: Option<PathBuf>,
}

pub async fn run(ctx: &AppContext, args: GenerateArgs) -> Result<i32> {
    let opts: Option<GenerationOptions> = match &args.options {
        Some(p) => Some(read_doc(p)?),
        None => None,
    };
    let out = match ctx.service.generate(args.engine, opts.as_ref()).await {
        Ok(out) => out,
        Err(GenerateError::Generation(e)) => return generation_failure(ctx.json, e),
        Err(e) => return Err(e.into()),
    };

    emit(
        ctx.json,
        || {
            let mut lines = vec![format!(
                "{} {} ({})",
                if out.written { "wrote" } else { "unchanged" },
                out.path.display(),
                &out.rendered.digest[..12]
            )];
            if !out.rendered.warnings.is_empty() {
                lines.push(human_warnings(&out.rendered.warnings));
            }
            lines.push(match &out.verdict {
                Verdict::Accepted => "core: accepted".to_string(),
                Verdict::Rejected { message } => format!("core: rejected\n{message}"),
                Verdict::Unavailable { reason } => format!("core: not checked ({reason})"),
            });
            lines.join("\n")
        },
        &out,
    );
    Ok(if out.verdict.is_rejected() {
        EXIT_REJECTED
    } else {
        EXIT_OK
    })
}
