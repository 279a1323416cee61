//! 集成测试模块
//!
//! 测试组件之间以及与配置文件、后台任务的协作

mod concurrency;
mod config_loading;
