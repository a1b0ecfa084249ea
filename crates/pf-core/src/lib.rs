//! pf-core: template store, generator/preview and rule-set refresh.
//!
//! pf-core：模板存储、配置生成/预览、规则集刷新。外部协作者（下载器、内核校验、节点来源）
//! 只通过 `pf_types::ports` 中的 trait 接入。

pub mod error;
pub mod fs_atomic;
pub mod generate;
pub mod refresh;
pub mod service;
pub mod store;

pub use error::{GenerateError, RefreshError, StoreError};
pub use generate::{Diff, Generated, Generator, Rendered};
pub use refresh::{RefreshOptions, RefreshState, RuleSetRefresher, RuleSetStatus, StatusEvent};
pub use service::PolicyService;
pub use store::TemplateStore;
