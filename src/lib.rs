//! Critique Stage Library
//!
//! 课堂评审舞台仲裁:启动引导、传输装配与命令行驱动。

pub mod bootstrap;
pub mod cli;
pub mod console;
pub mod observer;

// 重新导出常用类型
pub use cli::{Cli, TransportKind};
pub use console::ConsoleCommand;
pub use observer::{ConsoleObserver, TracingObserver};
