//! pforge library crate: CLI plus the concrete collaborators behind pf-types' ports.
//! 说明：`main.rs` 只做日志初始化与退出码处理，其余逻辑都在这里，便于集成测试直接调用。

pub mod cli;
pub mod config;
pub mod fetcher;
pub mod logging;
pub mod nodes;
pub mod runner;
