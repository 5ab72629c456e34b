//! 数据库模型

use chrono::{DateTime, Utc};
use medtour_core::models::*;
use medtour_core::{Money, Result};
use sqlx::FromRow;
use uuid::Uuid;

// 数据库表模型 - 使用FromRow trait用于SQL查询，枚举以字符串存储

/// 数据库病例表
#[derive(Debug, FromRow)]
pub struct DbCase {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub treatment_id: Option<Uuid>,
    pub stage: String,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbCase {
    /// 连同时间线一起转换为领域病例
    pub fn into_case(self, timeline: Vec<TimelineEvent>) -> Result<Case> {
        Ok(Case {
            id: self.id,
            patient_id: self.patient_id,
            treatment_id: self.treatment_id,
            stage: self.stage.parse()?,
            status: self.status.parse()?,
            notes: self.notes,
            created_at: self.created_at,
            updated_at: self.updated_at,
            timeline,
        })
    }
}

/// 数据库病例时间线表
#[derive(Debug, FromRow)]
pub struct DbTimelineEvent {
    pub event: String,
    pub at: DateTime<Utc>,
}

impl From<DbTimelineEvent> for TimelineEvent {
    fn from(db_event: DbTimelineEvent) -> Self {
        TimelineEvent {
            event: db_event.event,
            at: db_event.at,
        }
    }
}

/// 数据库报价表
#[derive(Debug, FromRow)]
pub struct DbQuote {
    pub id: Uuid,
    pub case_id: Uuid,
    pub doctor_id: Uuid,
    pub total: i64,
    pub currency: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbQuote> for Quote {
    type Error = medtour_core::MedTourError;

    fn try_from(db_quote: DbQuote) -> Result<Self> {
        Ok(Quote {
            id: db_quote.id,
            case_id: db_quote.case_id,
            doctor_id: db_quote.doctor_id,
            total: Money::new(db_quote.total),
            currency: db_quote.currency,
            status: db_quote.status.parse()?,
            created_at: db_quote.created_at,
            updated_at: db_quote.updated_at,
        })
    }
}

/// 数据库财务单据表
#[derive(Debug, FromRow)]
pub struct DbFinanceNote {
    pub id: Uuid,
    pub case_id: Uuid,
    pub quote_id: Uuid,
    pub total: i64,
    pub platform_fee: i64,
    pub provider_transfer: i64,
    pub profit: i64,
    pub currency: String,
    pub status: String,
    pub payment_method: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbFinanceNote> for FinanceNote {
    type Error = medtour_core::MedTourError;

    fn try_from(db_note: DbFinanceNote) -> Result<Self> {
        Ok(FinanceNote {
            id: db_note.id,
            case_id: db_note.case_id,
            quote_id: db_note.quote_id,
            total: Money::new(db_note.total),
            platform_fee: Money::new(db_note.platform_fee),
            provider_transfer: Money::new(db_note.provider_transfer),
            profit: Money::new(db_note.profit),
            currency: db_note.currency,
            status: db_note.status.parse()?,
            payment_method: db_note.payment_method.parse()?,
            created_at: db_note.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medtour_core::MedTourError;

    fn db_case(stage: &str, status: &str) -> DbCase {
        let now = Utc::now();
        DbCase {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            treatment_id: None,
            stage: stage.to_string(),
            status: status.to_string(),
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_case_row_conversion() {
        let case = db_case("Deposit", "QUOTED")
            .into_case(vec![TimelineEvent::now("Case opened")])
            .unwrap();
        assert_eq!(case.stage, JourneyStage::Deposit);
        assert_eq!(case.status, CaseStatus::Quoted);
        assert_eq!(case.timeline.len(), 1);
    }

    #[test]
    fn test_corrupt_rows_are_rejected() {
        assert!(matches!(
            db_case("Boarding", "NEW").into_case(Vec::new()),
            Err(MedTourError::InvalidStage(_))
        ));
        assert!(matches!(
            db_case("Intake", "PAID").into_case(Vec::new()),
            Err(MedTourError::Validation(_))
        ));
    }

    #[test]
    fn test_finance_row_conversion() {
        let note = FinanceNote::try_from(DbFinanceNote {
            id: Uuid::new_v4(),
            case_id: Uuid::new_v4(),
            quote_id: Uuid::new_v4(),
            total: 85_000,
            platform_fee: 12_750,
            provider_transfer: 72_250,
            profit: 12_750,
            currency: "INR".to_string(),
            status: "COMPLETED".to_string(),
            payment_method: "escrow".to_string(),
            created_at: Utc::now(),
        })
        .unwrap();
        assert_eq!(note.status, FinanceStatus::Completed);
        assert_eq!(note.payment_method, PaymentMethod::Escrow);
        assert_eq!(note.provider_transfer, Money::new(72_250));
    }
}
