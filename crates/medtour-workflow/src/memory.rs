//! 内存存储实现
//!
//! 单个写锁覆盖每次复合写入；先校验全部前置条件再应用修改，保证不会出现部分写入。

use crate::store::{AcceptanceWrite, CaseChange, CaseStore, FinanceSettlement, IssueWrite};
use async_trait::async_trait;
use chrono::Utc;
use medtour_core::{
    Case, CaseStatus, FinanceNote, FinanceStatus, JourneyStage, MedTourError, Quote, QuoteStatus, Result,
    TimelineEvent,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    cases: HashMap<Uuid, Case>,
    quotes: HashMap<Uuid, Quote>,
    finance_notes: HashMap<Uuid, FinanceNote>,
    notes_by_quote: HashMap<Uuid, Uuid>,   // quote_id -> finance_note_id
    accepted_by_case: HashMap<Uuid, Uuid>, // case_id -> accepted quote_id
}

impl State {
    fn case_mut(&mut self, id: Uuid) -> Result<&mut Case> {
        self.cases
            .get_mut(&id)
            .ok_or_else(|| MedTourError::NotFound(format!("Case {} not found", id)))
    }

    fn quote_mut(&mut self, id: Uuid) -> Result<&mut Quote> {
        self.quotes
            .get_mut(&id)
            .ok_or_else(|| MedTourError::NotFound(format!("Quote {} not found", id)))
    }

    /// 同一病例上已接受的其他报价
    fn check_accept_slot(&self, case_id: Uuid, quote_id: Uuid) -> Result<()> {
        match self.accepted_by_case.get(&case_id) {
            Some(existing) if *existing != quote_id => Err(MedTourError::Precondition(format!(
                "Case {} already has accepted quote {}",
                case_id, existing
            ))),
            _ => Ok(()),
        }
    }

    /// 报价状态变化后同步 `accepted_by_case`
    fn index_quote_status(&mut self, case_id: Uuid, quote_id: Uuid, status: QuoteStatus) {
        if status == QuoteStatus::Accepted {
            self.accepted_by_case.insert(case_id, quote_id);
        } else if self.accepted_by_case.get(&case_id) == Some(&quote_id) {
            self.accepted_by_case.remove(&case_id);
        }
    }
}

/// 内存病例存储
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 使后续所有写入以 `Persistence` 错误失败，用于模拟存储故障
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(MedTourError::Persistence("in-memory store is rejecting writes".to_string()));
        }
        Ok(())
    }

    pub async fn finance_note_count(&self) -> usize {
        self.state.read().await.finance_notes.len()
    }
}

#[async_trait]
impl CaseStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn insert_case(&self, case: &Case) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        if state.cases.contains_key(&case.id) {
            return Err(MedTourError::Precondition(format!("Case {} already exists", case.id)));
        }
        state.cases.insert(case.id, case.clone());
        Ok(())
    }

    async fn get_case(&self, id: Uuid) -> Result<Option<Case>> {
        Ok(self.state.read().await.cases.get(&id).cloned())
    }

    async fn update_case_status(&self, id: Uuid, status: CaseStatus) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let case = state.case_mut(id)?;
        case.status = status;
        case.updated_at = Utc::now();
        Ok(())
    }

    async fn update_case_stage(&self, id: Uuid, stage: JourneyStage) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let case = state.case_mut(id)?;
        case.stage = stage;
        case.updated_at = Utc::now();
        Ok(())
    }

    async fn append_case_timeline(&self, id: Uuid, event: &TimelineEvent) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        state.case_mut(id)?.timeline.push(event.clone());
        Ok(())
    }

    async fn insert_quote(&self, quote: &Quote) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        if !state.cases.contains_key(&quote.case_id) {
            return Err(MedTourError::NotFound(format!("Case {} not found", quote.case_id)));
        }
        if state.quotes.contains_key(&quote.id) {
            return Err(MedTourError::Precondition(format!("Quote {} already exists", quote.id)));
        }
        if quote.status == QuoteStatus::Accepted {
            state.check_accept_slot(quote.case_id, quote.id)?;
        }
        state.index_quote_status(quote.case_id, quote.id, quote.status);
        state.quotes.insert(quote.id, quote.clone());
        Ok(())
    }

    async fn get_quote(&self, id: Uuid) -> Result<Option<Quote>> {
        Ok(self.state.read().await.quotes.get(&id).cloned())
    }

    async fn list_quotes(&self, case_id: Uuid) -> Result<Vec<Quote>> {
        let state = self.state.read().await;
        let mut quotes: Vec<Quote> = state
            .quotes
            .values()
            .filter(|q| q.case_id == case_id)
            .cloned()
            .collect();
        quotes.sort_by_key(|q| q.created_at);
        Ok(quotes)
    }

    async fn update_quote_status(&self, id: Uuid, status: QuoteStatus) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let case_id = state.quote_mut(id)?.case_id;
        if status == QuoteStatus::Accepted {
            state.check_accept_slot(case_id, id)?;
        }
        state.index_quote_status(case_id, id, status);
        let quote = state.quote_mut(id)?;
        quote.status = status;
        quote.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_finance_note(&self, note: &FinanceNote) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        if state.notes_by_quote.contains_key(&note.quote_id) {
            return Err(MedTourError::Precondition(format!(
                "Quote {} already has a finance note",
                note.quote_id
            )));
        }
        state.notes_by_quote.insert(note.quote_id, note.id);
        state.finance_notes.insert(note.id, note.clone());
        Ok(())
    }

    async fn get_finance_note(&self, id: Uuid) -> Result<Option<FinanceNote>> {
        Ok(self.state.read().await.finance_notes.get(&id).cloned())
    }

    async fn get_finance_note_by_quote(&self, quote_id: Uuid) -> Result<Option<FinanceNote>> {
        let state = self.state.read().await;
        Ok(state
            .notes_by_quote
            .get(&quote_id)
            .and_then(|id| state.finance_notes.get(id))
            .cloned())
    }

    async fn update_finance_status(&self, id: Uuid, status: FinanceStatus) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let note = state
            .finance_notes
            .get_mut(&id)
            .ok_or_else(|| MedTourError::NotFound(format!("Finance note {} not found", id)))?;
        note.status = status;
        Ok(())
    }

    async fn commit_issue(&self, write: IssueWrite) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let case = state.case_mut(write.quote.case_id)?;
        if case.status != CaseStatus::New {
            return Err(MedTourError::Precondition(format!(
                "Case {} is {:?}, expected New",
                case.id, case.status
            )));
        }
        case.status = CaseStatus::Quoted;
        case.updated_at = Utc::now();
        case.timeline.push(write.event);
        state.quotes.insert(write.quote.id, write.quote);
        Ok(())
    }

    async fn commit_acceptance(&self, write: AcceptanceWrite) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;

        // 先校验，后修改
        let quote_status = state.quote_mut(write.quote_id)?.status;
        if quote_status != QuoteStatus::Sent {
            return Err(MedTourError::Precondition(format!(
                "Quote {} is {:?}, expected Sent",
                write.quote_id, quote_status
            )));
        }
        if let Some(existing) = state.accepted_by_case.get(&write.case_id) {
            return Err(MedTourError::Precondition(format!(
                "Case {} already has accepted quote {}",
                write.case_id, existing
            )));
        }
        if state.notes_by_quote.contains_key(&write.quote_id) {
            return Err(MedTourError::Precondition(format!(
                "Quote {} already has a finance note",
                write.quote_id
            )));
        }
        let case_status = state.case_mut(write.case_id)?.status;
        if case_status != CaseStatus::Quoted {
            return Err(MedTourError::Precondition(format!(
                "Case {} is {:?}, expected Quoted",
                write.case_id, case_status
            )));
        }

        let now = Utc::now();
        let quote = state.quote_mut(write.quote_id)?;
        quote.status = QuoteStatus::Accepted;
        quote.updated_at = now;

        let case = state.case_mut(write.case_id)?;
        case.status = CaseStatus::Accepted;
        case.updated_at = now;
        case.timeline.push(write.event);

        state.accepted_by_case.insert(write.case_id, write.quote_id);
        state.notes_by_quote.insert(write.quote_id, write.note.id);
        state.finance_notes.insert(write.note.id, write.note);
        Ok(())
    }

    async fn commit_case_change(&self, change: CaseChange) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let case = state.case_mut(change.case_id)?;
        if let Some(expected) = change.expected_status {
            if case.status != expected {
                return Err(MedTourError::Precondition(format!(
                    "Case {} is {:?}, expected {:?}",
                    case.id, case.status, expected
                )));
            }
        }
        if let Some(expected) = change.expected_stage {
            if case.stage != expected {
                return Err(MedTourError::Precondition(format!(
                    "Case {} is at stage {}, expected {}",
                    case.id, case.stage, expected
                )));
            }
        }
        if let Some(status) = change.status {
            case.status = status;
        }
        if let Some(stage) = change.stage {
            case.stage = stage;
        }
        case.updated_at = Utc::now();
        case.timeline.push(change.event);
        Ok(())
    }

    async fn commit_finance_settlement(&self, settlement: FinanceSettlement) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;

        let note = state
            .finance_notes
            .get(&settlement.note_id)
            .ok_or_else(|| MedTourError::NotFound(format!("Finance note {} not found", settlement.note_id)))?;
        if note.status != settlement.expected {
            return Err(MedTourError::Precondition(format!(
                "Finance note {} is {:?}, expected {:?}",
                settlement.note_id, note.status, settlement.expected
            )));
        }
        // 时间线的目标病例必须存在，否则不修改单据
        state.case_mut(settlement.case_id)?;

        if let Some(note) = state.finance_notes.get_mut(&settlement.note_id) {
            note.status = settlement.status;
        }
        let case = state.case_mut(settlement.case_id)?;
        case.updated_at = Utc::now();
        case.timeline.push(settlement.event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medtour_core::{Money, PaymentMethod};

    fn sample_quote(case_id: Uuid) -> Quote {
        let now = Utc::now();
        Quote {
            id: Uuid::new_v4(),
            case_id,
            doctor_id: Uuid::new_v4(),
            total: Money::new(1_000),
            currency: "INR".to_string(),
            status: QuoteStatus::Sent,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_primitive_writes() {
        let store = InMemoryStore::new();
        let case = Case::new(Uuid::new_v4(), None, None);
        store.insert_case(&case).await.unwrap();

        store.update_case_status(case.id, CaseStatus::Quoted).await.unwrap();
        store.update_case_stage(case.id, JourneyStage::Visa).await.unwrap();
        store
            .append_case_timeline(case.id, &TimelineEvent::now("note"))
            .await
            .unwrap();

        let quote = sample_quote(case.id);
        store.insert_quote(&quote).await.unwrap();
        store.update_quote_status(quote.id, QuoteStatus::Accepted).await.unwrap();

        let stored = store.get_case(case.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CaseStatus::Quoted);
        assert_eq!(stored.stage, JourneyStage::Visa);
        assert_eq!(stored.timeline.len(), 1);
        assert_eq!(store.list_quotes(case.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_second_accepted_quote_is_rejected() {
        let store = InMemoryStore::new();
        let case = Case::new(Uuid::new_v4(), None, None);
        store.insert_case(&case).await.unwrap();

        let first = sample_quote(case.id);
        let second = sample_quote(case.id);
        store.insert_quote(&first).await.unwrap();
        store.insert_quote(&second).await.unwrap();

        store.update_quote_status(first.id, QuoteStatus::Accepted).await.unwrap();
        let result = store.update_quote_status(second.id, QuoteStatus::Accepted).await;
        assert!(matches!(result, Err(MedTourError::Precondition(_))));
    }

    #[tokio::test]
    async fn test_accepted_index_follows_quote_status() {
        let store = InMemoryStore::new();
        let case = Case::new(Uuid::new_v4(), None, None);
        store.insert_case(&case).await.unwrap();

        let first = sample_quote(case.id);
        let second = sample_quote(case.id);
        store.insert_quote(&first).await.unwrap();
        store.insert_quote(&second).await.unwrap();

        store.update_quote_status(first.id, QuoteStatus::Accepted).await.unwrap();
        store.update_quote_status(first.id, QuoteStatus::Sent).await.unwrap();
        store.update_quote_status(second.id, QuoteStatus::Accepted).await.unwrap();

        let mut third = sample_quote(case.id);
        third.status = QuoteStatus::Accepted;
        let result = store.insert_quote(&third).await;
        assert!(matches!(result, Err(MedTourError::Precondition(_))));
        assert_eq!(store.list_quotes(case.id).await.unwrap().len(), 2);

        let duplicate = store.insert_quote(&first).await;
        assert!(matches!(duplicate, Err(MedTourError::Precondition(_))));
    }

    #[tokio::test]
    async fn test_case_change_rejects_stale_stage() {
        let store = InMemoryStore::new();
        let case = Case::new(Uuid::new_v4(), None, None);
        store.insert_case(&case).await.unwrap();
        store.update_case_stage(case.id, JourneyStage::Visa).await.unwrap();

        let result = store
            .commit_case_change(CaseChange {
                case_id: case.id,
                expected_status: None,
                expected_stage: Some(JourneyStage::Intake),
                status: None,
                stage: Some(JourneyStage::Deposit),
                event: TimelineEvent::now("Stage changed from Intake to Deposit"),
            })
            .await;
        assert!(matches!(result, Err(MedTourError::Precondition(_))));

        let stored = store.get_case(case.id).await.unwrap().unwrap();
        assert_eq!(stored.stage, JourneyStage::Visa);
        assert!(stored.timeline.is_empty());
    }

    fn pending_note(case_id: Uuid) -> FinanceNote {
        FinanceNote {
            id: Uuid::new_v4(),
            case_id,
            quote_id: Uuid::new_v4(),
            total: Money::new(1_000),
            platform_fee: Money::new(150),
            provider_transfer: Money::new(850),
            profit: Money::new(150),
            currency: "INR".to_string(),
            status: FinanceStatus::Pending,
            payment_method: PaymentMethod::Escrow,
            created_at: Utc::now(),
        }
    }

    fn settlement(note: &FinanceNote, expected: FinanceStatus, status: FinanceStatus) -> FinanceSettlement {
        FinanceSettlement {
            note_id: note.id,
            case_id: note.case_id,
            expected,
            status,
            event: TimelineEvent::now("Payment settled"),
        }
    }

    #[tokio::test]
    async fn test_settlement_rejects_stale_expected_status() {
        let store = InMemoryStore::new();
        let case = Case::new(Uuid::new_v4(), None, None);
        store.insert_case(&case).await.unwrap();
        let note = pending_note(case.id);
        store.insert_finance_note(&note).await.unwrap();

        store
            .commit_finance_settlement(settlement(&note, FinanceStatus::Pending, FinanceStatus::Refunded))
            .await
            .unwrap();
        let stale = store
            .commit_finance_settlement(settlement(&note, FinanceStatus::Pending, FinanceStatus::Completed))
            .await;
        assert!(matches!(stale, Err(MedTourError::Precondition(_))));

        let stored = store.get_finance_note(note.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FinanceStatus::Refunded);
        assert_eq!(store.get_case(case.id).await.unwrap().unwrap().timeline.len(), 1);
    }

    #[tokio::test]
    async fn test_settlement_without_case_leaves_note_pending() {
        let store = InMemoryStore::new();
        let note = pending_note(Uuid::new_v4());
        store.insert_finance_note(&note).await.unwrap();

        let result = store
            .commit_finance_settlement(settlement(&note, FinanceStatus::Pending, FinanceStatus::Completed))
            .await;
        assert!(matches!(result, Err(MedTourError::NotFound(_))));
        assert_eq!(
            store.get_finance_note(note.id).await.unwrap().unwrap().status,
            FinanceStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_failed_writes_surface_persistence_error() {
        let store = InMemoryStore::new();
        store.set_fail_writes(true);

        let case = Case::new(Uuid::new_v4(), None, None);
        let result = store.insert_case(&case).await;
        assert!(matches!(result, Err(MedTourError::Persistence(_))));
        assert!(store.get_case(case.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_case_is_not_found() {
        let store = InMemoryStore::new();
        let result = store.update_case_status(Uuid::new_v4(), CaseStatus::Closed).await;
        assert!(matches!(result, Err(MedTourError::NotFound(_))));
    }
}
