//! `pforge` command line.
//!
//! 退出码：0 成功；1 出错；2 校验失败或内核拒绝了生成的配置。

pub mod generate;
pub mod import;
pub mod output;
pub mod preview;
pub mod ruleset;
pub mod template;
pub mod validate;

use crate::config::AppConfig;
use crate::fetcher::ReqwestFetcher;
use crate::nodes::FileNodeSource;
use crate::runner::ProcessRunner;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pf_core::{Generator, PolicyService, RuleSetRefresher, TemplateStore};
use pf_types::ports::{NodeSource, StaticNodes};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const EXIT_OK: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_REJECTED: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "pforge", version)]
#[command(about = "Edit policy templates and generate mihomo / sing-box configs")]
pub struct Args {
    /// App config file (YAML/JSON). Defaults to ./pforge.yaml if present.
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,
    /// Data directory; overrides the config file and PF_DATA_DIR.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
    /// Machine-readable output.
    #[arg(long, global = true)]
    pub json: bool,
    /// Log filter, e.g. `debug` (env: PF_LOG_LEVEL)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
    /// compact | json (env: PF_LOG_FORMAT)
    #[arg(long, global = true, value_parser = ["compact", "json"])]
    pub log_format: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show or edit the stored templates
    Template(template::TemplateArgs),
    /// Check templates against structural invariants
    Validate(validate::ValidateArgs),
    /// Print the artifact that would be generated
    Preview(preview::PreviewArgs),
    /// Write the artifact and have the proxy core check it
    Generate(generate::GenerateArgs),
    /// 规则集相关操作
    Ruleset(ruleset::RulesetArgs),
    /// Read an existing engine config into that engine's template
    Import(import::ImportArgs),
}

/// Everything a subcommand needs.
pub struct AppContext {
    pub config: AppConfig,
    pub service: PolicyService,
    pub json: bool,
}

impl AppContext {
    pub fn build(args: &Args) -> Result<Self> {
        let mut config = AppConfig::load(args.config.as_deref())?;
        if let Some(dir) = &args.data_dir {
            config.data_dir = dir.clone();
        }

        let store = Arc::new(TemplateStore::persistent(&config.data_dir));
        let nodes: Arc<dyn NodeSource> = match &config.nodes {
            Some(p) => Arc::new(FileNodeSource::new(p)),
            None => Arc::new(StaticNodes::default()),
        };
        let runner = ProcessRunner {
            mihomo: config.cores.mihomo.clone(),
            singbox: config.cores.singbox.clone(),
        };
        let generator = Generator::new(Arc::clone(&store), &config.data_dir)
            .with_nodes(nodes)
            .with_runner(Arc::new(runner))
            .with_options(config.generation.clone());
        let fetcher = ReqwestFetcher::new(config.relay_prefix.clone())
            .context("build http client")?;
        let refresher = RuleSetRefresher::new(Arc::new(fetcher), config.refresh_options());

        Ok(Self {
            service: PolicyService::new(store, generator, refresher),
            config,
            json: args.json,
        })
    }
}

pub async fn run(args: Args) -> Result<i32> {
    let ctx = AppContext::build(&args)?;
    match args.command {
        Commands::Template(a) => template::run(&ctx, a),
        Commands::Validate(a) => validate::run(&ctx, a),
        Commands::Preview(a) => preview::run(&ctx, a),
        Commands::Generate(a) => generate::run(&ctx, a).await,
        Commands::Ruleset(a) => ruleset::run(&ctx, a).await,
        Commands::Import(a) => import::run(&ctx, a),
    }
}

/// Parse JSON or YAML, picked by extension (`.yaml`/`.yml` are YAML, anything else JSON).
pub fn parse_doc<T: DeserializeOwned>(path: &Path, text: &str) -> Result<T> {
    let yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    );
    if yaml {
        Ok(serde_yaml::from_str(text)?)
    } else {
        Ok(serde_json::from_str(text)?)
    }
}

pub fn read_doc<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_doc(path, &text).with_context(|| format!("parse {}", path.display()))
}
