//! Engine adapter seam: one stateless implementation per target grammar.
//!
//! 两个内核各自实现 `EngineAdapter`，策略模型本身不含任何内核细节。

use crate::mihomo::Mihomo;
use crate::model::Template;
use crate::options::GenerationOptions;
use crate::singbox::SingBox;
use crate::validator;
use pf_types::ports::Node;
use pf_types::{EngineKind, GenerationError, Warning, WarningKind};

/// A compiled document plus the non-fatal findings collected while building it.
#[derive(Debug, Clone)]
pub struct Compiled<D> {
    pub document: D,
    pub warnings: Vec<Warning>,
}

pub trait EngineAdapter {
    const ENGINE: EngineKind;
    type Document;

    /// Policy model -> engine document.
    fn compile(
        t: &Template,
        nodes: &[Node],
        opts: &GenerationOptions,
    ) -> Result<Compiled<Self::Document>, GenerationError>;

    /// Engine document -> policy model.
    fn decompile(doc: &Self::Document) -> Result<Template, GenerationError>;

    fn encode(doc: &Self::Document) -> Result<String, GenerationError>;

    fn decode(text: &str) -> Result<Self::Document, GenerationError>;
}

/// Rendered artifact text for one engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub engine: EngineKind,
    pub text: String,
    pub warnings: Vec<Warning>,
}

/// Validate `t` for `engine`, compile it and encode the result.
pub fn render(
    engine: EngineKind,
    t: &Template,
    nodes: &[Node],
    opts: &GenerationOptions,
) -> Result<Artifact, GenerationError> {
    validator::ensure_valid(t, engine).map_err(GenerationError::Invalid)?;
    let (text, warnings) = match engine {
        EngineKind::Mihomo => render_with::<Mihomo>(t, nodes, opts)?,
        EngineKind::SingBox => render_with::<SingBox>(t, nodes, opts)?,
    };
    tracing::debug!(
        engine = %engine,
        groups = t.groups.len(),
        rules = t.rules.len(),
        warnings = warnings.len(),
        "template rendered"
    );
    Ok(Artifact {
        engine,
        text,
        warnings,
    })
}

fn render_with<A: EngineAdapter>(
    t: &Template,
    nodes: &[Node],
    opts: &GenerationOptions,
) -> Result<(String, Vec<Warning>), GenerationError> {
    let compiled = A::compile(t, nodes, opts)?;
    let text = A::encode(&compiled.document)?;
    Ok((text, compiled.warnings))
}

/// Parse an engine artifact back into a template. The result is not validated.
pub fn import(engine: EngineKind, text: &str) -> Result<Template, GenerationError> {
    match engine {
        EngineKind::Mihomo => Mihomo::decompile(&Mihomo::decode(text)?),
        EngineKind::SingBox => SingBox::decompile(&SingBox::decode(text)?),
    }
}

/// Declared rule-sets no rule refers to. Legal, just dead weight in the artifact.
pub(crate) fn unused_rule_sets(t: &Template, extra_used: &[String]) -> Vec<Warning> {
    let used = t.referenced_rule_sets();
    t.rule_sets
        .iter()
        .enumerate()
        .filter(|(_, rs)| {
            !used.contains(&rs.tag.as_str()) && !extra_used.iter().any(|u| u == &rs.tag)
        })
        .map(|(i, rs)| {
            Warning::new(
                WarningKind::UnusedRuleSet,
                format!("/ruleSets/{i}"),
                format!("rule-set `{}` is declared but no rule references it", rs.tag),
            )
        })
        .collect()
}
