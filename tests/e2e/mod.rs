//! 端到端测试模块
//!
//! 测试完整的业务流程和场景

mod breaker_recovery;
mod rate_limit_to_blacklist;
mod whitelist_bypass;
