//! Policy model, validation and engine adapters.
//! 策略模型、校验与内核适配器。
//!
//! `Template` (groups, ordered rules, rule-sets) -> `validator` -> `mihomo` / `singbox` -> text.
//! Both adapters also read their own artifacts back into a `Template`.
//!
//! ## Modules / 模块
//! - [`model`]: the engine-agnostic policy model. 与内核无关的策略模型。
//! - [`validator`]: exhaustive structural checks. 结构校验（一次收集全部错误）。
//! - [`mihomo`] / [`singbox`]: engine A / engine B adapters. 两个内核适配器。
//! - [`presets`]: built-in templates and factory defaults. 预设模板与默认模板。
//! - [`batch`]: multi-line payload expansion. 批量规则展开。
//!
//! Everything here is synchronous and performs no I/O.

pub mod adapter;
pub mod batch;
pub mod mihomo;
pub mod model;
pub mod options;
pub mod presets;
pub mod resolve;
pub mod singbox;
pub mod validator;

pub use adapter::{import, render, Artifact, Compiled, EngineAdapter};
pub use model::{
    Behavior, Condition, ConditionKind, GroupKind, ProxyGroup, Rule, RuleSet, RuleSetFormat,
    SourceKind, Template,
};
pub use options::{GenerationOptions, MihomoOptions, SingBoxMode, SingBoxOptions};
pub use validator::{ensure_valid, validate, validate_for};
