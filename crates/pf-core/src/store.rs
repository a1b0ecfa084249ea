//! Template store: one policy template per engine, replaced whole-collection at a time.
//!
//! 每个内核一份模板；每次替换都先对“替换后的完整模板”做校验，失败则原样保留。
//!
//! Mutations on one engine are serialized by that engine's lock; the two engines never
//! contend. The lock only covers validate + persist + commit, never network I/O.

use crate::error::{Result, StoreError};
use crate::fs_atomic::write_atomic;
use parking_lot::Mutex;
use pf_config::batch::expand_all;
use pf_config::presets::{default_template, preset};
use pf_config::{validate_for, ProxyGroup, Rule, RuleSet, Template};
use pf_types::EngineKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub struct TemplateStore {
    dir: Option<PathBuf>,
    mihomo: Mutex<Option<Template>>,
    singbox: Mutex<Option<Template>>,
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl TemplateStore {
    /// Store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            mihomo: Mutex::new(None),
            singbox: Mutex::new(None),
        }
    }

    /// Store persisting under `<data_dir>/templates/<engine>.json`.
    pub fn persistent(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(data_dir.into().join("templates")),
            ..Self::in_memory()
        }
    }

    fn slot(&self, engine: EngineKind) -> &Mutex<Option<Template>> {
        match engine {
            EngineKind::Mihomo => &self.mihomo,
            EngineKind::SingBox => &self.singbox,
        }
    }

    fn path(&self, engine: EngineKind) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|d| d.join(format!("{}.json", engine.as_str())))
    }

    /// Stored template, or the engine default on first use.
    pub fn get(&self, engine: EngineKind) -> Template {
        let mut slot = self.slot(engine).lock();
        self.loaded(engine, &mut slot).clone()
    }

    pub fn replace_groups(&self, engine: EngineKind, groups: Vec<ProxyGroup>) -> Result<Template> {
        self.commit(engine, "groups", |t| t.groups = groups)
    }

    /// Multi-line payloads are expanded into one rule per line before validation.
    pub fn replace_rules(&self, engine: EngineKind, rules: Vec<Rule>) -> Result<Template> {
        let rules = expand_all(&rules);
        self.commit(engine, "rules", |t| t.rules = rules)
    }

    pub fn replace_rule_sets(
        &self,
        engine: EngineKind,
        rule_sets: Vec<RuleSet>,
    ) -> Result<Template> {
        self.commit(engine, "ruleSets", |t| t.rule_sets = rule_sets)
    }

    /// Replace all three collections at once (import).
    pub fn replace(&self, engine: EngineKind, template: Template) -> Result<Template> {
        self.commit(engine, "template", |t| {
            *t = Template {
                rules: expand_all(&template.rules),
                ..template
            }
        })
    }

    /// Discard all edits and restore the engine default.
    pub fn reset(&self, engine: EngineKind) -> Result<Template> {
        let mut slot = self.slot(engine).lock();
        let t = default_template(engine);
        self.persist(engine, &t)?;
        *slot = Some(t.clone());
        info!(engine = %engine, "template reset to defaults");
        Ok(t)
    }

    /// Replace the preset's engine template with the preset.
    pub fn apply_preset(&self, id: &str) -> Result<(EngineKind, Template)> {
        let (engine, t) = preset(id).ok_or_else(|| StoreError::UnknownPreset(id.to_string()))?;
        let t = self.replace(engine, t)?;
        info!(engine = %engine, preset = id, "preset applied");
        Ok((engine, t))
    }

    fn commit(
        &self,
        engine: EngineKind,
        what: &str,
        apply: impl FnOnce(&mut Template),
    ) -> Result<Template> {
        let mut slot = self.slot(engine).lock();
        let mut next = self.loaded(engine, &mut slot).clone();
        apply(&mut next);

        let errors = validate_for(&next, engine);
        if !errors.is_empty() {
            debug!(engine = %engine, what, errors = errors.len(), "replace rejected");
            return Err(StoreError::Validation(errors));
        }
        self.persist(engine, &next)?;
        *slot = Some(next.clone());
        info!(
            engine = %engine,
            what,
            groups = next.groups.len(),
            rules = next.rules.len(),
            rule_sets = next.rule_sets.len(),
            "template updated"
        );
        Ok(next)
    }

    fn loaded<'s>(&self, engine: EngineKind, slot: &'s mut Option<Template>) -> &'s Template {
        slot.get_or_insert_with(|| self.load(engine))
    }

    fn load(&self, engine: EngineKind) -> Template {
        let Some(path) = self.path(engine) else {
            return default_template(engine);
        };
        match read_template(&path) {
            Ok(Some(t)) => {
                let errors = validate_for(&t, engine);
                if !errors.is_empty() {
                    warn!(
                        engine = %engine,
                        path = %path.display(),
                        errors = errors.len(),
                        first = %errors[0],
                        "stored template is invalid, using defaults"
                    );
                    return default_template(engine);
                }
                debug!(engine = %engine, path = %path.display(), "template loaded");
                t
            }
            Ok(None) => default_template(engine),
            Err(e) => {
                warn!(engine = %engine, path = %path.display(), error = %e, "unreadable template, using defaults");
                default_template(engine)
            }
        }
    }

    fn persist(&self, engine: EngineKind, t: &Template) -> Result<()> {
        let Some(path) = self.path(engine) else {
            return Ok(());
        };
        let persist_err = |source: std::io::Error| StoreError::Persist {
            path: path.clone(),
            source,
        };
        let bytes = serde_json::to_vec_pretty(t).map_err(|e| persist_err(e.into()))?;
        write_atomic(&path, &bytes).map_err(persist_err)
    }
}

fn read_template(path: &Path) -> std::io::Result<Option<Template>> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(std::io::Error::from),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
