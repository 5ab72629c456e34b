//! 托管财务拆分计算
//!
//! 纯函数：由报价总额计算平台费、医生转账和平台利润。

use medtour_core::{FinanceNote, FinanceStatus, MedTourError, Money, PaymentMethod, Quote, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 默认平台费率：15%（1500 基点）
pub const DEFAULT_PLATFORM_FEE_BPS: u32 = 1500;

/// 拆分结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinanceSplit {
    pub total: Money,
    pub fee: Money,
    pub transfer: Money,
    pub profit: Money,
}

/// 财务拆分计算器
#[derive(Debug, Clone, Copy)]
pub struct FinanceSplitter {
    fee_bps: u32,
}

impl FinanceSplitter {
    pub fn new(fee_bps: u32) -> Result<Self> {
        if fee_bps > medtour_core::utils::BASIS_POINTS as u32 {
            return Err(MedTourError::Validation(format!(
                "platform fee of {} bps exceeds 100%",
                fee_bps
            )));
        }
        Ok(Self { fee_bps })
    }

    pub fn fee_bps(&self) -> u32 {
        self.fee_bps
    }

    /// fee = round(total * rate)，transfer = total - fee，profit = fee
    pub fn split(&self, total: Money) -> Result<FinanceSplit> {
        if total.is_negative() {
            return Err(MedTourError::Validation(format!(
                "quote total must not be negative, got {}",
                total
            )));
        }
        let fee = total.portion_bps(self.fee_bps)?;
        let transfer = total
            .checked_sub(fee)
            .ok_or_else(|| MedTourError::Internal("fee exceeds total".to_string()))?;

        Ok(FinanceSplit {
            total,
            fee,
            transfer,
            profit: fee,
        })
    }

    /// 为已接受的报价生成待支付的财务单据
    pub fn note_for(&self, quote: &Quote, payment_method: PaymentMethod) -> Result<FinanceNote> {
        let split = self.split(quote.total)?;
        Ok(FinanceNote {
            id: Uuid::new_v4(),
            case_id: quote.case_id,
            quote_id: quote.id,
            total: split.total,
            platform_fee: split.fee,
            provider_transfer: split.transfer,
            profit: split.profit,
            currency: quote.currency.clone(),
            status: FinanceStatus::Pending,
            payment_method,
            created_at: chrono::Utc::now(),
        })
    }
}

impl Default for FinanceSplitter {
    fn default() -> Self {
        Self {
            fee_bps: DEFAULT_PLATFORM_FEE_BPS,
        }
    }
}

/// 按默认费率拆分
pub fn split(total: Money) -> Result<FinanceSplit> {
    FinanceSplitter::default().split(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_split() {
        let s = split(Money::new(85_000)).unwrap();
        assert_eq!(s.fee, Money::new(12_750));
        assert_eq!(s.transfer, Money::new(72_250));
        assert_eq!(s.profit, Money::new(12_750));
    }

    #[test]
    fn test_zero_total() {
        let s = split(Money::ZERO).unwrap();
        assert_eq!(s.fee, Money::ZERO);
        assert_eq!(s.transfer, Money::ZERO);
        assert_eq!(s.profit, Money::ZERO);
    }

    #[test]
    fn test_negative_total_rejected() {
        assert!(matches!(split(Money::new(-100)), Err(MedTourError::Validation(_))));
    }

    #[test]
    fn test_fee_plus_transfer_reconstructs_total() {
        let totals = [0, 1, 3, 7, 10, 99, 101, 12_345, 85_000, 999_999, 4_500_003];
        for units in totals {
            let total = Money::new(units);
            let s = split(total).unwrap();
            assert_eq!(s.fee.units() + s.transfer.units(), units);
            let expected_fee = (units as f64 * 0.15).round() as i64;
            assert_eq!(s.fee.units(), expected_fee, "total {}", units);
            assert_eq!(s.profit, s.fee);
        }
    }

    #[test]
    fn test_custom_rate() {
        let splitter = FinanceSplitter::new(1000).unwrap();
        assert_eq!(splitter.split(Money::new(1_005)).unwrap().fee, Money::new(101));
        assert!(FinanceSplitter::new(10_001).is_err());
    }
}
