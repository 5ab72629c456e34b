//! # MedTour工作流模块
//!
//! 提供病例与报价的完整生命周期管理，包括：
//! - 病例状态机：就诊旅程七阶段与报价工作流状态
//! - 报价台账：签发与接受报价
//! - 财务拆分：平台费、医生转账与利润的计算
//! - 时间线：只追加的病例审计轨迹

pub mod engine;
pub mod finance;
pub mod ledger;
pub mod memory;
pub mod state_machine;
pub mod store;
pub mod timeline;

// 重新导出主要类型
pub use engine::{CaseProgress, EngineSettings, LifecycleEngine};
pub use finance::{FinanceSplit, FinanceSplitter, DEFAULT_PLATFORM_FEE_BPS};
pub use ledger::QuoteLedger;
pub use memory::InMemoryStore;
pub use state_machine::{current_stage_index, progress_percent, CaseEvent, CaseStateMachine};
pub use store::{AcceptanceWrite, CaseChange, CaseStore, FinanceSettlement, IssueWrite};
