//! PostgreSQL 病例存储
//!
//! 复合写入在单个事务中完成；任何一步失败都会在事务丢弃时回滚。

use crate::connection::DatabasePool;
use crate::queries::{self, map_db_error};
use async_trait::async_trait;
use medtour_core::{
    Case, CaseStatus, FinanceNote, FinanceStatus, JourneyStage, Quote, QuoteStatus, Result, TimelineEvent,
};
use medtour_workflow::{AcceptanceWrite, CaseChange, CaseStore, FinanceSettlement, IssueWrite};
use uuid::Uuid;

/// PostgreSQL 病例存储
#[derive(Debug, Clone)]
pub struct PgCaseStore {
    pool: DatabasePool,
}

impl PgCaseStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }
}

#[async_trait]
impl CaseStore for PgCaseStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn insert_case(&self, case: &Case) -> Result<()> {
        let mut tx = self.pool.pool().begin().await.map_err(map_db_error)?;
        queries::insert_case(&mut tx, case).await?;
        tx.commit().await.map_err(map_db_error)?;
        Ok(())
    }

    async fn get_case(&self, id: Uuid) -> Result<Option<Case>> {
        let mut conn = self.pool.pool().acquire().await.map_err(map_db_error)?;
        queries::get_case(&mut conn, id).await
    }

    async fn update_case_status(&self, id: Uuid, status: CaseStatus) -> Result<()> {
        let mut conn = self.pool.pool().acquire().await.map_err(map_db_error)?;
        queries::update_case_status(&mut conn, id, status, None).await
    }

    async fn update_case_stage(&self, id: Uuid, stage: JourneyStage) -> Result<()> {
        let mut conn = self.pool.pool().acquire().await.map_err(map_db_error)?;
        queries::update_case_stage(&mut conn, id, stage).await
    }

    async fn append_case_timeline(&self, id: Uuid, event: &TimelineEvent) -> Result<()> {
        let mut conn = self.pool.pool().acquire().await.map_err(map_db_error)?;
        queries::append_timeline(&mut conn, id, event).await
    }

    async fn insert_quote(&self, quote: &Quote) -> Result<()> {
        let mut conn = self.pool.pool().acquire().await.map_err(map_db_error)?;
        queries::insert_quote(&mut conn, quote).await
    }

    async fn get_quote(&self, id: Uuid) -> Result<Option<Quote>> {
        let mut conn = self.pool.pool().acquire().await.map_err(map_db_error)?;
        queries::get_quote(&mut conn, id).await
    }

    async fn list_quotes(&self, case_id: Uuid) -> Result<Vec<Quote>> {
        let mut conn = self.pool.pool().acquire().await.map_err(map_db_error)?;
        queries::list_quotes(&mut conn, case_id).await
    }

    async fn update_quote_status(&self, id: Uuid, status: QuoteStatus) -> Result<()> {
        let mut conn = self.pool.pool().acquire().await.map_err(map_db_error)?;
        queries::update_quote_status(&mut conn, id, status, None).await
    }

    async fn insert_finance_note(&self, note: &FinanceNote) -> Result<()> {
        let mut conn = self.pool.pool().acquire().await.map_err(map_db_error)?;
        queries::insert_finance_note(&mut conn, note).await
    }

    async fn get_finance_note(&self, id: Uuid) -> Result<Option<FinanceNote>> {
        let mut conn = self.pool.pool().acquire().await.map_err(map_db_error)?;
        queries::get_finance_note(&mut conn, id).await
    }

    async fn get_finance_note_by_quote(&self, quote_id: Uuid) -> Result<Option<FinanceNote>> {
        let mut conn = self.pool.pool().acquire().await.map_err(map_db_error)?;
        queries::get_finance_note_by_quote(&mut conn, quote_id).await
    }

    async fn update_finance_status(&self, id: Uuid, status: FinanceStatus) -> Result<()> {
        let mut conn = self.pool.pool().acquire().await.map_err(map_db_error)?;
        queries::update_finance_status(&mut conn, id, status, None).await
    }

    async fn commit_issue(&self, write: IssueWrite) -> Result<()> {
        let case_id = write.quote.case_id;
        let mut tx = self.pool.pool().begin().await.map_err(map_db_error)?;

        queries::update_case_status(&mut tx, case_id, CaseStatus::Quoted, Some(CaseStatus::New)).await?;
        queries::insert_quote(&mut tx, &write.quote).await?;
        queries::append_timeline(&mut tx, case_id, &write.event).await?;

        tx.commit().await.map_err(map_db_error)?;
        tracing::debug!("Committed quote {} on case {}", write.quote.id, case_id);
        Ok(())
    }

    async fn commit_acceptance(&self, write: AcceptanceWrite) -> Result<()> {
        let mut tx = self.pool.pool().begin().await.map_err(map_db_error)?;

        // 锁定病例行，串行化同一病例上的并发接受
        queries::lock_case(&mut tx, write.case_id, Some(CaseStatus::Quoted), None).await?;
        queries::update_quote_status(
            &mut tx,
            write.quote_id,
            QuoteStatus::Accepted,
            Some(QuoteStatus::Sent),
        )
        .await?;
        queries::update_case_status(
            &mut tx,
            write.case_id,
            CaseStatus::Accepted,
            Some(CaseStatus::Quoted),
        )
        .await?;
        queries::insert_finance_note(&mut tx, &write.note).await?;
        queries::append_timeline(&mut tx, write.case_id, &write.event).await?;

        tx.commit().await.map_err(map_db_error)?;
        tracing::debug!(
            "Committed acceptance of quote {} with finance note {}",
            write.quote_id,
            write.note.id
        );
        Ok(())
    }

    async fn commit_case_change(&self, change: CaseChange) -> Result<()> {
        let mut tx = self.pool.pool().begin().await.map_err(map_db_error)?;

        queries::lock_case(&mut tx, change.case_id, change.expected_status, change.expected_stage).await?;
        if let Some(status) = change.status {
            queries::update_case_status(&mut tx, change.case_id, status, change.expected_status).await?;
        }
        if let Some(stage) = change.stage {
            queries::update_case_stage(&mut tx, change.case_id, stage).await?;
        }
        queries::append_timeline(&mut tx, change.case_id, &change.event).await?;

        tx.commit().await.map_err(map_db_error)?;
        Ok(())
    }

    async fn commit_finance_settlement(&self, settlement: FinanceSettlement) -> Result<()> {
        let mut tx = self.pool.pool().begin().await.map_err(map_db_error)?;

        queries::update_finance_status(
            &mut tx,
            settlement.note_id,
            settlement.status,
            Some(settlement.expected),
        )
        .await?;
        queries::append_timeline(&mut tx, settlement.case_id, &settlement.event).await?;

        tx.commit().await.map_err(map_db_error)?;
        tracing::debug!(
            "Committed finance note {} as {:?}",
            settlement.note_id,
            settlement.status
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::DatabaseQueries;
    use chrono::Utc;
    use medtour_core::{MedTourError, Money, PaymentMethod};
    use medtour_workflow::FinanceSplitter;
    use std::time::Duration;
    use tokio::sync::OnceCell;

    static SCHEMA: OnceCell<()> = OnceCell::const_new();

    /// 未设置 `DATABASE_URL` 时返回 `None`，测试直接跳过
    async fn test_store() -> Option<PgCaseStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = DatabasePool::connect(&url, 4, Duration::from_secs(5)).await.unwrap();
        SCHEMA
            .get_or_init(|| async {
                DatabaseQueries::new(&pool).create_tables().await.unwrap();
            })
            .await;
        Some(PgCaseStore::new(pool))
    }

    fn sent_quote(case_id: Uuid, total: i64) -> Quote {
        let now = Utc::now();
        Quote {
            id: Uuid::new_v4(),
            case_id,
            doctor_id: Uuid::new_v4(),
            total: Money::new(total),
            currency: "INR".to_string(),
            status: QuoteStatus::Sent,
            created_at: now,
            updated_at: now,
        }
    }

    async fn quoted_case(store: &PgCaseStore) -> (Case, Quote) {
        let case = Case::new(Uuid::new_v4(), None, None);
        store.insert_case(&case).await.unwrap();
        let quote = sent_quote(case.id, 85_000);
        store
            .commit_issue(IssueWrite {
                quote: quote.clone(),
                event: TimelineEvent::now("Quote issued"),
            })
            .await
            .unwrap();
        (case, quote)
    }

    fn acceptance(quote: &Quote) -> AcceptanceWrite {
        AcceptanceWrite {
            quote_id: quote.id,
            case_id: quote.case_id,
            note: FinanceSplitter::default()
                .note_for(quote, PaymentMethod::Escrow)
                .unwrap(),
            event: TimelineEvent::now("Quote accepted"),
        }
    }

    #[tokio::test]
    async fn test_second_accepted_quote_is_rejected() {
        let Some(store) = test_store().await else {
            return;
        };
        let (case, first) = quoted_case(&store).await;
        let second = sent_quote(case.id, 80_000);
        store.insert_quote(&second).await.unwrap();

        store.commit_acceptance(acceptance(&first)).await.unwrap();

        let result = store.commit_acceptance(acceptance(&second)).await;
        assert!(matches!(result, Err(MedTourError::Precondition(_))));

        // 绕过病例行锁，直接由部分唯一索引拒绝
        let result = store.update_quote_status(second.id, QuoteStatus::Accepted).await;
        assert!(matches!(result, Err(MedTourError::Precondition(_))));
        assert_eq!(
            store.get_quote(second.id).await.unwrap().unwrap().status,
            QuoteStatus::Sent
        );
        store.pool().close().await;
    }

    #[tokio::test]
    async fn test_failed_acceptance_rolls_back() {
        let Some(store) = test_store().await else {
            return;
        };
        let (case, quote) = quoted_case(&store).await;

        // 拆分不平衡的单据会被 CHECK 约束拒绝，此时报价与病例已在事务中更新
        let mut write = acceptance(&quote);
        write.note.provider_transfer = Money::new(1);
        let result = store.commit_acceptance(write).await;
        assert!(matches!(result, Err(MedTourError::Persistence(_))));

        assert_eq!(
            store.get_quote(quote.id).await.unwrap().unwrap().status,
            QuoteStatus::Sent
        );
        let stored = store.get_case(case.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CaseStatus::Quoted);
        assert_eq!(stored.timeline.len(), 1);
        assert!(store.get_finance_note_by_quote(quote.id).await.unwrap().is_none());

        store.commit_acceptance(acceptance(&quote)).await.unwrap();
        store.pool().close().await;
    }

    #[tokio::test]
    async fn test_issue_requires_new_case() {
        let Some(store) = test_store().await else {
            return;
        };
        let (case, _) = quoted_case(&store).await;

        let again = sent_quote(case.id, 40_000);
        let result = store
            .commit_issue(IssueWrite {
                quote: again.clone(),
                event: TimelineEvent::now("Quote issued"),
            })
            .await;
        assert!(matches!(result, Err(MedTourError::Precondition(_))));
        assert!(store.get_quote(again.id).await.unwrap().is_none());
        assert_eq!(store.list_quotes(case.id).await.unwrap().len(), 1);
        store.pool().close().await;
    }

    #[tokio::test]
    async fn test_settlement_checks_expected_status() {
        let Some(store) = test_store().await else {
            return;
        };
        let (case, quote) = quoted_case(&store).await;
        let write = acceptance(&quote);
        let note_id = write.note.id;
        store.commit_acceptance(write).await.unwrap();

        let settle = |expected, status| FinanceSettlement {
            note_id,
            case_id: case.id,
            expected,
            status,
            event: TimelineEvent::now("Payment settled"),
        };
        store
            .commit_finance_settlement(settle(FinanceStatus::Pending, FinanceStatus::Refunded))
            .await
            .unwrap();
        let stale = store
            .commit_finance_settlement(settle(FinanceStatus::Pending, FinanceStatus::Completed))
            .await;
        assert!(matches!(stale, Err(MedTourError::Precondition(_))));

        let note = store.get_finance_note(note_id).await.unwrap().unwrap();
        assert_eq!(note.status, FinanceStatus::Refunded);
        assert_eq!(store.get_case(case.id).await.unwrap().unwrap().timeline.len(), 3);
        store.pool().close().await;
    }

    #[tokio::test]
    async fn test_stage_change_checks_expected_stage() {
        let Some(store) = test_store().await else {
            return;
        };
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
        assert_eq!(
            store.get_case(case.id).await.unwrap().unwrap().stage,
            JourneyStage::Visa
        );
        store.pool().close().await;
    }
}
