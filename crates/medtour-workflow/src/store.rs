//! 持久化协作接口
//!
//! 引擎通过注入的 `CaseStore` 访问存储。多步写入（签发报价、接受报价、病例状态变更）
//! 以复合写入的形式提交，实现方必须保证全部成功或全部失败。
//! 带 `expected_*` 字段的写入在存储内部重新校验当前值，调用方读到的旧值不会被覆盖。

use async_trait::async_trait;
use medtour_core::{
    Case, CaseStatus, FinanceNote, FinanceStatus, JourneyStage, Quote, QuoteStatus, Result,
    TimelineEvent,
};
use uuid::Uuid;

/// 签发报价：插入报价，病例 New → Quoted，追加时间线
#[derive(Debug, Clone)]
pub struct IssueWrite {
    pub quote: Quote,
    pub event: TimelineEvent,
}

/// 接受报价：报价 Sent → Accepted，病例 Quoted → Accepted，插入财务单据，追加时间线
#[derive(Debug, Clone)]
pub struct AcceptanceWrite {
    pub quote_id: Uuid,
    pub case_id: Uuid,
    pub note: FinanceNote,
    pub event: TimelineEvent,
}

/// 病例变更：可选的状态与阶段更新，附带一条时间线事件
#[derive(Debug, Clone)]
pub struct CaseChange {
    pub case_id: Uuid,
    /// 写入时病例必须仍处于该状态
    pub expected_status: Option<CaseStatus>,
    /// 写入时病例必须仍处于该阶段
    pub expected_stage: Option<JourneyStage>,
    pub status: Option<CaseStatus>,
    pub stage: Option<JourneyStage>,
    pub event: TimelineEvent,
}

/// 财务单据结算：单据 expected → status，并向所属病例追加时间线
#[derive(Debug, Clone)]
pub struct FinanceSettlement {
    pub note_id: Uuid,
    pub case_id: Uuid,
    pub expected: FinanceStatus,
    pub status: FinanceStatus,
    pub event: TimelineEvent,
}

/// 病例存储接口
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// 存储实现名称
    fn name(&self) -> &str;

    async fn insert_case(&self, case: &Case) -> Result<()>;

    async fn get_case(&self, id: Uuid) -> Result<Option<Case>>;

    async fn update_case_status(&self, id: Uuid, status: CaseStatus) -> Result<()>;

    async fn update_case_stage(&self, id: Uuid, stage: JourneyStage) -> Result<()>;

    async fn append_case_timeline(&self, id: Uuid, event: &TimelineEvent) -> Result<()>;

    async fn insert_quote(&self, quote: &Quote) -> Result<()>;

    async fn get_quote(&self, id: Uuid) -> Result<Option<Quote>>;

    async fn list_quotes(&self, case_id: Uuid) -> Result<Vec<Quote>>;

    async fn update_quote_status(&self, id: Uuid, status: QuoteStatus) -> Result<()>;

    async fn insert_finance_note(&self, note: &FinanceNote) -> Result<()>;

    async fn get_finance_note(&self, id: Uuid) -> Result<Option<FinanceNote>>;

    async fn get_finance_note_by_quote(&self, quote_id: Uuid) -> Result<Option<FinanceNote>>;

    async fn update_finance_status(&self, id: Uuid, status: FinanceStatus) -> Result<()>;

    /// 原子地签发报价；病例已不是 New 时返回 `Precondition`
    async fn commit_issue(&self, write: IssueWrite) -> Result<()>;

    /// 原子地接受报价；同一病例已有被接受的报价、报价不再是 Sent
    /// 或病例不再是 Quoted 时返回 `Precondition`，且不留下任何部分写入
    async fn commit_acceptance(&self, write: AcceptanceWrite) -> Result<()>;

    /// 原子地应用病例变更；病例状态或阶段与期望值不符时返回 `Precondition`
    async fn commit_case_change(&self, change: CaseChange) -> Result<()>;

    /// 原子地结算财务单据；单据已不处于 `expected` 时返回 `Precondition`
    async fn commit_finance_settlement(&self, settlement: FinanceSettlement) -> Result<()>;
}
