//! Generator / preview.
//!
//! Rendering is a pure function of the stored template, the node list and the options, so
//! the same state always yields the same bytes. `generate` additionally writes the artifact
//! and relays the proxy core's verdict untouched.

use crate::error::GenerateError;
use crate::fs_atomic::write_atomic_async;
use crate::store::TemplateStore;
use pf_config::{render, GenerationOptions};
use pf_types::ports::{CoreRunner, NodeSource, NoopRunner, StaticNodes, Verdict};
use pf_types::{EngineKind, GenerationError, Warning};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Artifact text plus what was found while producing it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rendered {
    pub engine: EngineKind,
    pub text: String,
    pub warnings: Vec<Warning>,
    /// blake3 hex of `text`.
    pub digest: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Generated {
    pub rendered: Rendered,
    pub path: PathBuf,
    /// False when the file on disk already had identical content.
    pub written: bool,
    pub verdict: Verdict,
}

/// Line-level comparison of a fresh preview against earlier text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diff {
    pub changed: bool,
    /// Zero-based indices of lines that differ.
    pub lines: Vec<usize>,
}

pub fn digest(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

pub struct Generator {
    store: Arc<TemplateStore>,
    nodes: Arc<dyn NodeSource>,
    runner: Arc<dyn CoreRunner>,
    out_dir: PathBuf,
    options: GenerationOptions,
}

impl Generator {
    pub fn new(store: Arc<TemplateStore>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            nodes: Arc::new(StaticNodes::default()),
            runner: Arc::new(NoopRunner),
            out_dir: out_dir.into(),
            options: GenerationOptions::default(),
        }
    }

    pub fn with_nodes(mut self, nodes: Arc<dyn NodeSource>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn CoreRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    pub fn artifact_path(&self, engine: EngineKind) -> PathBuf {
        self.out_dir.join(engine.artifact_name())
    }

    /// Render with the configured options. No side effects beyond logging.
    pub fn render(&self, engine: EngineKind) -> Result<Rendered, GenerationError> {
        self.render_with(engine, &self.options)
    }

    pub fn render_with(
        &self,
        engine: EngineKind,
        opts: &GenerationOptions,
    ) -> Result<Rendered, GenerationError> {
        let template = self.store.get(engine);
        let nodes = self.nodes.nodes();
        let artifact = render(engine, &template, &nodes, opts)?;
        for w in &artifact.warnings {
            warn!(engine = %engine, ptr = %w.ptr, kind = ?w.kind, "{}", w.msg);
        }
        Ok(Rendered {
            engine,
            digest: digest(&artifact.text),
            text: artifact.text,
            warnings: artifact.warnings,
        })
    }

    /// Same as [`render`](Self::render).
    pub fn preview(&self, engine: EngineKind) -> Result<Rendered, GenerationError> {
        self.render(engine)
    }

    pub fn diff(&self, engine: EngineKind, previous: &str) -> Result<Diff, GenerationError> {
        let now = self.render(engine)?;
        Ok(diff_lines(previous, &now.text))
    }

    /// Render, write `<out_dir>/<artifact>` unless unchanged, then ask the core for a verdict.
    pub async fn generate(
        &self,
        engine: EngineKind,
        opts: Option<&GenerationOptions>,
    ) -> Result<Generated, GenerateError> {
        let rendered = self.render_with(engine, opts.unwrap_or(&self.options))?;
        let path = self.artifact_path(engine);

        let written = if same_digest(&path, &rendered.digest).await {
            debug!(engine = %engine, path = %path.display(), "artifact unchanged, skip write");
            false
        } else {
            write_atomic_async(&path, rendered.text.as_bytes())
                .await
                .map_err(|source| GenerateError::Write {
                    path: path.clone(),
                    source,
                })?;
            info!(engine = %engine, path = %path.display(), bytes = rendered.text.len(), "artifact written");
            true
        };

        let verdict = self.runner.check(engine, &path).await;
        if verdict.is_rejected() {
            warn!(engine = %engine, "core rejected artifact");
        }
        Ok(Generated {
            rendered,
            path,
            written,
            verdict,
        })
    }
}

async fn same_digest(path: &Path, digest_hex: &str) -> bool {
    match tokio::fs::read(path).await {
        Ok(bytes) => blake3::hash(&bytes).to_hex().as_str() == digest_hex,
        Err(_) => false,
    }
}

pub fn diff_lines(before: &str, after: &str) -> Diff {
    let a: Vec<&str> = before.lines().collect();
    let b: Vec<&str> = after.lines().collect();
    let lines: Vec<usize> = (0..a.len().max(b.len()))
        .filter(|&i| a.get(i) != b.get(i))
        .collect();
    Diff {
        changed: !lines.is_empty() || before != after,
        lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_reports_line_indices() {
        let d = diff_lines("a\nb\nc", "a\nx\nc\nd");
        assert!(d.changed);
        assert_eq!(d.lines, vec![1, 3]);
        assert!(!diff_lines("same\n", "same\n").changed);
    }

    #[test]
    fn render_is_stable() {
        let g = Generator::new(Arc::new(TemplateStore::in_memory()), ".");
        for engine in EngineKind::ALL {
            let a = g.render(engine).unwrap();
            let b = g.render(engine).unwrap();
            assert_eq!(a, b);
            assert_eq!(a.digest, digest(&b.text));
        }
    }
}
