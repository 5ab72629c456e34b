//! 病例生命周期引擎
//!
//! 协调状态机、报价台账、财务拆分和时间线的核心引擎。存储通过构造函数注入。

use crate::{
    finance::FinanceSplitter,
    ledger::QuoteLedger,
    state_machine::{self, stage_change_text, CaseEvent, CaseStateMachine},
    store::{CaseChange, CaseStore, FinanceSettlement},
    timeline,
};
use medtour_core::utils::is_valid_currency;
use medtour_core::{
    Case, FinanceNote, FinanceStatus, MedTourError, Money, PaymentMethod, Quote, Result,
    TimelineEvent,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// 引擎设置
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub platform_fee_bps: u32,
    pub currency: String,
    pub payment_method: PaymentMethod,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            platform_fee_bps: crate::finance::DEFAULT_PLATFORM_FEE_BPS,
            currency: "INR".to_string(),
            payment_method: PaymentMethod::Escrow,
        }
    }
}

/// 病例进度概览
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseProgress {
    pub case_id: Uuid,
    pub stage_index: usize,
    pub percent: u8,
    pub recent_activity: Vec<TimelineEvent>,
}

/// 病例生命周期引擎
pub struct LifecycleEngine {
    store: Arc<dyn CaseStore>,
    state_machine: CaseStateMachine,
    ledger: QuoteLedger,
}

impl LifecycleEngine {
    /// 创建新的生命周期引擎
    pub fn new(store: Arc<dyn CaseStore>, settings: EngineSettings) -> Result<Self> {
        if !is_valid_currency(&settings.currency) {
            return Err(MedTourError::Config(format!(
                "currency '{}' is not a three-letter code",
                settings.currency
            )));
        }
        let splitter = FinanceSplitter::new(settings.platform_fee_bps)?;
        let ledger = QuoteLedger::new(
            store.clone(),
            splitter,
            settings.currency,
            settings.payment_method,
        );

        tracing::info!(
            "Lifecycle engine ready on {} store, platform fee {} bps",
            store.name(),
            splitter.fee_bps()
        );

        Ok(Self {
            store,
            state_machine: CaseStateMachine::new(),
            ledger,
        })
    }

    /// 患者提交初诊登记，创建病例
    pub async fn open_case(
        &self,
        patient_id: Uuid,
        treatment_id: Option<Uuid>,
        notes: Option<String>,
    ) -> Result<Case> {
        let mut case = Case::new(patient_id, treatment_id, notes);
        timeline::record(&mut case, "Case opened");
        self.store.insert_case(&case).await?;

        tracing::info!("Opened case {} for patient {}", case.id, patient_id);
        Ok(case)
    }

    pub async fn get_case(&self, case_id: Uuid) -> Result<Case> {
        self.store
            .get_case(case_id)
            .await?
            .ok_or_else(|| MedTourError::NotFound(format!("Case {} not found", case_id)))
    }

    /// 将病例移动到指定就诊阶段；读取后阶段已被并发修改时返回 `Precondition`
    pub async fn transition_stage(&self, case_id: Uuid, new_stage: &str) -> Result<Case> {
        let case = self.get_case(case_id).await?;
        let updated = self.state_machine.transition_stage(&case, new_stage)?;

        self.store
            .commit_case_change(CaseChange {
                case_id,
                expected_status: None,
                expected_stage: Some(case.stage),
                status: None,
                stage: Some(updated.stage),
                event: TimelineEvent::now(stage_change_text(case.stage, updated.stage)),
            })
            .await?;

        tracing::info!("Case {} stage {} -> {}", case_id, case.stage, updated.stage);
        self.get_case(case_id).await
    }

    /// 追加一条时间线事件
    pub async fn record(&self, case_id: Uuid, event_text: &str) -> Result<()> {
        self.store
            .append_case_timeline(case_id, &TimelineEvent::now(event_text))
            .await
    }

    pub async fn issue_quote(&self, case_id: Uuid, doctor_id: Uuid, amount: Money) -> Result<Quote> {
        self.ledger.issue_quote(case_id, doctor_id, amount).await
    }

    pub async fn accept_quote(&self, quote_id: Uuid) -> Result<(Quote, FinanceNote)> {
        self.ledger.accept_quote(quote_id).await
    }

    pub async fn quotes_for_case(&self, case_id: Uuid) -> Result<Vec<Quote>> {
        self.ledger.quotes_for_case(case_id).await
    }

    /// 关闭病例（病例从不物理删除）
    pub async fn close_case(&self, case_id: Uuid, reason: Option<&str>) -> Result<Case> {
        let case = self.get_case(case_id).await?;
        let closed = self.state_machine.transition(case.status, CaseEvent::Closed)?;
        let event = match reason {
            Some(reason) => format!("Case closed: {}", reason),
            None => "Case closed".to_string(),
        };

        self.store
            .commit_case_change(CaseChange {
                case_id,
                expected_status: Some(case.status),
                expected_stage: None,
                status: Some(closed),
                stage: None,
                event: TimelineEvent::now(event),
            })
            .await?;

        tracing::info!("Closed case {}", case_id);
        self.get_case(case_id).await
    }

    /// 支付回调更新财务单据状态：Pending → Completed | Refunded，Completed → Refunded
    pub async fn settle_finance_note(&self, note_id: Uuid, status: FinanceStatus) -> Result<FinanceNote> {
        let note = self
            .store
            .get_finance_note(note_id)
            .await?
            .ok_or_else(|| MedTourError::NotFound(format!("Finance note {} not found", note_id)))?;

        let allowed = matches!(
            (note.status, status),
            (FinanceStatus::Pending, FinanceStatus::Completed)
                | (FinanceStatus::Pending, FinanceStatus::Refunded)
                | (FinanceStatus::Completed, FinanceStatus::Refunded)
        );
        if !allowed {
            tracing::warn!("Rejected finance note {} change {:?} -> {:?}", note_id, note.status, status);
            return Err(MedTourError::Precondition(format!(
                "Finance note {} cannot move from {:?} to {:?}",
                note_id, note.status, status
            )));
        }

        self.store
            .commit_finance_settlement(FinanceSettlement {
                note_id,
                case_id: note.case_id,
                expected: note.status,
                status,
                event: TimelineEvent::now(format!("Payment {}", status.as_str().to_lowercase())),
            })
            .await?;

        tracing::info!("Finance note {} is now {:?}", note_id, status);
        Ok(FinanceNote { status, ..note })
    }

    /// 病例进度与最近动态
    pub async fn progress(&self, case_id: Uuid) -> Result<CaseProgress> {
        let case = self.get_case(case_id).await?;
        Ok(CaseProgress {
            case_id,
            stage_index: state_machine::current_stage_index(&case),
            percent: state_machine::progress_percent(&case),
            recent_activity: timeline::recent_activity(&case, timeline::RECENT_ACTIVITY_LIMIT)
                .into_iter()
                .cloned()
                .collect(),
        })
    }
}
