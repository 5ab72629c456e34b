//! 核心数据模型定义

use crate::error::{MedTourError, Result};
use crate::utils::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 患者病例
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub treatment_id: Option<Uuid>,
    pub stage: JourneyStage, // 就诊旅程阶段（面向患者展示）
    pub status: CaseStatus,  // 报价工作流状态
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub timeline: Vec<TimelineEvent>,
}

impl Case {
    /// 以初始状态创建病例（Intake / New）
    pub fn new(patient_id: Uuid, treatment_id: Option<Uuid>, notes: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            patient_id,
            treatment_id,
            stage: JourneyStage::Intake,
            status: CaseStatus::New,
            notes,
            created_at: now,
            updated_at: now,
            timeline: Vec::new(),
        }
    }
}

/// 时间线事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub event: String,
    pub at: DateTime<Utc>,
}

impl TimelineEvent {
    pub fn now(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            at: Utc::now(),
        }
    }
}

/// 就诊旅程阶段，按顺序排列
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JourneyStage {
    Intake,      // 初诊登记
    TeleConsult, // 远程会诊
    Deposit,     // 支付定金
    Visa,        // 签证办理
    Admit,       // 入院
    Surgery,     // 手术
    Rehab,       // 康复
}

impl JourneyStage {
    pub const ALL: [JourneyStage; 7] = [
        JourneyStage::Intake,
        JourneyStage::TeleConsult,
        JourneyStage::Deposit,
        JourneyStage::Visa,
        JourneyStage::Admit,
        JourneyStage::Surgery,
        JourneyStage::Rehab,
    ];

    /// 在有序阶段列表中的位置
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JourneyStage::Intake => "Intake",
            JourneyStage::TeleConsult => "TeleConsult",
            JourneyStage::Deposit => "Deposit",
            JourneyStage::Visa => "Visa",
            JourneyStage::Admit => "Admit",
            JourneyStage::Surgery => "Surgery",
            JourneyStage::Rehab => "Rehab",
        }
    }
}

impl fmt::Display for JourneyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JourneyStage {
    type Err = MedTourError;

    fn from_str(s: &str) -> Result<Self> {
        JourneyStage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| MedTourError::InvalidStage(s.to_string()))
    }
}

/// 报价工作流状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CaseStatus {
    New,      // 新建
    Quoted,   // 已报价
    Accepted, // 已接受报价
    Closed,   // 已关闭
}

impl CaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CaseStatus::New => "NEW",
            CaseStatus::Quoted => "QUOTED",
            CaseStatus::Accepted => "ACCEPTED",
            CaseStatus::Closed => "CLOSED",
        }
    }

    /// 与工作流状态一致的最早就诊阶段；关闭状态不对应任何阶段
    pub fn journey_floor(self) -> Option<JourneyStage> {
        match self {
            CaseStatus::New => Some(JourneyStage::Intake),
            CaseStatus::Quoted => Some(JourneyStage::TeleConsult),
            CaseStatus::Accepted => Some(JourneyStage::Deposit),
            CaseStatus::Closed => None,
        }
    }
}

impl FromStr for CaseStatus {
    type Err = MedTourError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NEW" => Ok(CaseStatus::New),
            "QUOTED" => Ok(CaseStatus::Quoted),
            "ACCEPTED" => Ok(CaseStatus::Accepted),
            "CLOSED" => Ok(CaseStatus::Closed),
            _ => Err(MedTourError::Validation(format!("unknown case status: {}", s))),
        }
    }
}

/// 报价
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub id: Uuid,
    pub case_id: Uuid,
    pub doctor_id: Uuid,
    pub total: Money,
    pub currency: String,
    pub status: QuoteStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 报价状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum QuoteStatus {
    Draft,    // 草稿
    Sent,     // 已发送
    Accepted, // 已接受
}

impl QuoteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QuoteStatus::Draft => "DRAFT",
            QuoteStatus::Sent => "SENT",
            QuoteStatus::Accepted => "ACCEPTED",
        }
    }
}

impl FromStr for QuoteStatus {
    type Err = MedTourError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(QuoteStatus::Draft),
            "SENT" => Ok(QuoteStatus::Sent),
            "ACCEPTED" => Ok(QuoteStatus::Accepted),
            _ => Err(MedTourError::Validation(format!("unknown quote status: {}", s))),
        }
    }
}

/// 托管财务单据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinanceNote {
    pub id: Uuid,
    pub case_id: Uuid,
    pub quote_id: Uuid,
    pub total: Money,             // X
    pub platform_fee: Money,      // A
    pub provider_transfer: Money, // Y
    pub profit: Money,            // Z
    pub currency: String,
    pub status: FinanceStatus,
    pub payment_method: PaymentMethod,
    pub created_at: DateTime<Utc>,
}

/// 财务单据状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FinanceStatus {
    Pending,   // 待支付
    Completed, // 已完成
    Refunded,  // 已退款
}

impl FinanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FinanceStatus::Pending => "PENDING",
            FinanceStatus::Completed => "COMPLETED",
            FinanceStatus::Refunded => "REFUNDED",
        }
    }
}

impl FromStr for FinanceStatus {
    type Err = MedTourError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(FinanceStatus::Pending),
            "COMPLETED" => Ok(FinanceStatus::Completed),
            "REFUNDED" => Ok(FinanceStatus::Refunded),
            _ => Err(MedTourError::Validation(format!("unknown finance status: {}", s))),
        }
    }
}

/// 支付方式标记
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Escrow,
    Card,
    BankTransfer,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Escrow => "escrow",
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = MedTourError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "escrow" => Ok(PaymentMethod::Escrow),
            "card" => Ok(PaymentMethod::Card),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            _ => Err(MedTourError::Validation(format!("unknown payment method: {}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_and_parse() {
        assert_eq!(JourneyStage::Intake.index(), 0);
        assert_eq!(JourneyStage::Deposit.index(), 2);
        assert_eq!(JourneyStage::Rehab.index(), 6);
        assert_eq!("teleconsult".parse::<JourneyStage>().unwrap(), JourneyStage::TeleConsult);
        assert!(matches!(
            "not-a-stage".parse::<JourneyStage>(),
            Err(MedTourError::InvalidStage(_))
        ));
        // 只放宽大小写，不去除空白
        assert_eq!("DEPOSIT".parse::<JourneyStage>().unwrap(), JourneyStage::Deposit);
        assert!(matches!(
            " Deposit ".parse::<JourneyStage>(),
            Err(MedTourError::InvalidStage(_))
        ));
        assert!("".parse::<JourneyStage>().is_err());
    }

    #[test]
    fn test_status_journey_floor() {
        assert_eq!(CaseStatus::New.journey_floor(), Some(JourneyStage::Intake));
        assert_eq!(CaseStatus::Quoted.journey_floor(), Some(JourneyStage::TeleConsult));
        assert_eq!(CaseStatus::Accepted.journey_floor(), Some(JourneyStage::Deposit));
        assert_eq!(CaseStatus::Closed.journey_floor(), None);
    }

    #[test]
    fn test_status_strings() {
        for status in [CaseStatus::New, CaseStatus::Quoted, CaseStatus::Accepted, CaseStatus::Closed] {
            assert_eq!(status.as_str().parse::<CaseStatus>().unwrap(), status);
        }
        assert_eq!("sent".parse::<QuoteStatus>().unwrap(), QuoteStatus::Sent);
        assert!("paid".parse::<FinanceStatus>().is_err());
        assert_eq!(PaymentMethod::default(), PaymentMethod::Escrow);
    }
}
