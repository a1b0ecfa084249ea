//! The operations callers drive: template editing, preview/generate and rule-set refresh.
//!
//! Transport-agnostic; the CLI in the binary is one caller, an HTTP layer could be another.

use crate::error::{GenerateError, RefreshError, Result, StoreError};
use crate::generate::{Diff, Generated, Generator, Rendered};
use crate::refresh::{RuleSetRefresher, RuleSetStatus, StatusEvent};
use crate::store::TemplateStore;
use pf_config::{import, GenerationOptions, ProxyGroup, Rule, RuleSet, Template};
use pf_types::{EngineKind, GenerationError};
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct PolicyService {
    store: Arc<TemplateStore>,
    generator: Generator,
    refresher: RuleSetRefresher,
}

impl PolicyService {
    /// `generator` must be built over the same `store`.
    pub fn new(store: Arc<TemplateStore>, generator: Generator, refresher: RuleSetRefresher) -> Self {
        Self {
            store,
            generator,
            refresher,
        }
    }

    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    pub fn get_template(&self, engine: EngineKind) -> Template {
        self.store.get(engine)
    }

    pub fn replace_groups(&self, engine: EngineKind, groups: Vec<ProxyGroup>) -> Result<Template> {
        self.store.replace_groups(engine, groups)
    }

    pub fn replace_rules(&self, engine: EngineKind, rules: Vec<Rule>) -> Result<Template> {
        self.store.replace_rules(engine, rules)
    }

    pub fn replace_rule_sets(
        &self,
        engine: EngineKind,
        rule_sets: Vec<RuleSet>,
    ) -> Result<Template> {
        self.store.replace_rule_sets(engine, rule_sets)
    }

    pub fn reset_template(&self, engine: EngineKind) -> Result<Template> {
        self.store.reset(engine)
    }

    pub fn apply_preset(&self, id: &str) -> Result<(EngineKind, Template)> {
        self.store.apply_preset(id)
    }

    /// Parse an engine artifact and store it as that engine's template.
    pub fn import_artifact(&self, engine: EngineKind, text: &str) -> Result<Template> {
        let t = import(engine, text).map_err(StoreError::Import)?;
        self.store.replace(engine, t)
    }

    pub fn preview(&self, engine: EngineKind) -> std::result::Result<Rendered, GenerationError> {
        self.generator.preview(engine)
    }

    pub fn diff(
        &self,
        engine: EngineKind,
        previous: &str,
    ) -> std::result::Result<Diff, GenerationError> {
        self.generator.diff(engine, previous)
    }

    pub async fn generate(
        &self,
        engine: EngineKind,
        opts: Option<&GenerationOptions>,
    ) -> std::result::Result<Generated, GenerateError> {
        self.generator.generate(engine, opts).await
    }

    pub async fn refresh_rule_set(
        &self,
        engine: EngineKind,
        tag: &str,
    ) -> std::result::Result<RuleSetStatus, RefreshError> {
        let rule_sets = self.store.get(engine).rule_sets;
        self.refresher.refresh_one(engine, &rule_sets, tag).await
    }

    pub async fn refresh_all_rule_sets(
        &self,
        engine: EngineKind,
    ) -> std::result::Result<Vec<RuleSetStatus>, RefreshError> {
        let rule_sets = self.store.get(engine).rule_sets;
        self.refresher.refresh_all(engine, &rule_sets).await
    }

    pub fn rule_set_statuses(&self, engine: EngineKind) -> Vec<RuleSetStatus> {
        self.refresher.statuses(engine)
    }

    pub fn subscribe_refresh(&self) -> broadcast::Receiver<StatusEvent> {
        self.refresher.subscribe()
    }
}
