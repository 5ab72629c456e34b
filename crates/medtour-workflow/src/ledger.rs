//! 报价台账
//!
//! 负责报价的签发与接受。接受报价时报价、病例和财务单据在一次原子写入中完成。

use crate::finance::FinanceSplitter;
use crate::state_machine::{CaseEvent, CaseStateMachine};
use crate::store::{AcceptanceWrite, CaseStore, IssueWrite};
use medtour_core::{
    CaseStatus, FinanceNote, MedTourError, Money, PaymentMethod, Quote, QuoteStatus, Result,
    TimelineEvent,
};
use std::sync::Arc;
use uuid::Uuid;

/// 报价台账
pub struct QuoteLedger {
    store: Arc<dyn CaseStore>,
    state_machine: CaseStateMachine,
    splitter: FinanceSplitter,
    currency: String,
    payment_method: PaymentMethod,
}

impl QuoteLedger {
    pub fn new(
        store: Arc<dyn CaseStore>,
        splitter: FinanceSplitter,
        currency: impl Into<String>,
        payment_method: PaymentMethod,
    ) -> Self {
        Self {
            store,
            state_machine: CaseStateMachine::new(),
            splitter,
            currency: currency.into(),
            payment_method,
        }
    }

    /// 医生为病例签发报价
    pub async fn issue_quote(&self, case_id: Uuid, doctor_id: Uuid, amount: Money) -> Result<Quote> {
        if !amount.is_positive() {
            return Err(MedTourError::Validation(format!(
                "quote amount must be positive, got {}",
                amount
            )));
        }

        let case = self
            .store
            .get_case(case_id)
            .await?
            .ok_or_else(|| MedTourError::NotFound(format!("Case {} not found", case_id)))?;

        if case.status != CaseStatus::New {
            tracing::warn!("Rejected quote for case {} in status {:?}", case_id, case.status);
            return Err(MedTourError::Precondition(format!(
                "Case {} is {:?}, quotes can only be issued on new cases",
                case_id, case.status
            )));
        }
        self.state_machine.transition(case.status, CaseEvent::QuoteIssued)?;

        let now = chrono::Utc::now();
        let quote = Quote {
            id: Uuid::new_v4(),
            case_id,
            doctor_id,
            total: amount,
            currency: self.currency.clone(),
            status: QuoteStatus::Sent,
            created_at: now,
            updated_at: now,
        };
        let event = TimelineEvent::now(format!(
            "Quote {} issued for {} {}",
            quote.id, quote.total, quote.currency
        ));

        self.store
            .commit_issue(IssueWrite {
                quote: quote.clone(),
                event,
            })
            .await?;

        tracing::info!("Issued quote {} on case {} for {}", quote.id, case_id, amount);
        Ok(quote)
    }

    /// 患者接受报价，生成财务单据。
    ///
    /// 对已接受的报价重复调用是幂等的，返回已存储的报价和财务单据。
    pub async fn accept_quote(&self, quote_id: Uuid) -> Result<(Quote, FinanceNote)> {
        let quote = self
            .store
            .get_quote(quote_id)
            .await?
            .ok_or_else(|| MedTourError::NotFound(format!("Quote {} not found", quote_id)))?;

        match quote.status {
            QuoteStatus::Accepted => return self.replay_acceptance(quote).await,
            QuoteStatus::Draft => {
                return Err(MedTourError::Precondition(format!(
                    "Quote {} is still a draft",
                    quote_id
                )))
            }
            QuoteStatus::Sent => {}
        }

        let case = self
            .store
            .get_case(quote.case_id)
            .await?
            .ok_or_else(|| MedTourError::NotFound(format!("Case {} not found", quote.case_id)))?;

        if !self.state_machine.can_transition(case.status, CaseEvent::QuoteAccepted) {
            tracing::warn!(
                "Rejected acceptance of quote {} on case {} in status {:?}",
                quote_id,
                case.id,
                case.status
            );
            return Err(MedTourError::Precondition(format!(
                "Case {} is {:?}, cannot accept quote {}",
                case.id, case.status, quote_id
            )));
        }

        let note = self.splitter.note_for(&quote, self.payment_method)?;
        let event = TimelineEvent::now(format!(
            "Quote {} accepted: fee {} / transfer {} {}",
            quote_id, note.platform_fee, note.provider_transfer, note.currency
        ));

        let committed = self
            .store
            .commit_acceptance(AcceptanceWrite {
                quote_id,
                case_id: case.id,
                note: note.clone(),
                event,
            })
            .await;

        if let Err(err) = committed {
            // 并发接受同一报价时，落败方返回胜出方写入的结果
            if let MedTourError::Precondition(_) = err {
                if let Some(current) = self.store.get_quote(quote_id).await? {
                    if current.status == QuoteStatus::Accepted {
                        return self.replay_acceptance(current).await;
                    }
                }
            }
            return Err(err);
        }

        let mut accepted = quote;
        accepted.status = QuoteStatus::Accepted;
        accepted.updated_at = chrono::Utc::now();

        tracing::info!(
            "Accepted quote {} on case {}, finance note {} created",
            quote_id,
            case.id,
            note.id
        );
        Ok((accepted, note))
    }

    /// 病例的全部报价，按创建时间排序
    pub async fn quotes_for_case(&self, case_id: Uuid) -> Result<Vec<Quote>> {
        self.store.list_quotes(case_id).await
    }

    async fn replay_acceptance(&self, quote: Quote) -> Result<(Quote, FinanceNote)> {
        let note = self
            .store
            .get_finance_note_by_quote(quote.id)
            .await?
            .ok_or_else(|| {
                MedTourError::Internal(format!("Accepted quote {} has no finance note", quote.id))
            })?;
        tracing::debug!("Quote {} already accepted, returning finance note {}", quote.id, note.id);
        Ok((quote, note))
    }
}
