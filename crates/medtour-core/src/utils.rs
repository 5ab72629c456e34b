//! 金额与通用工具函数

use crate::error::{MedTourError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 基点分母（10000 bps = 100%）
pub const BASIS_POINTS: i64 = 10_000;

/// 金额，以整数货币单位（如整卢比）表示
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn new(units: i64) -> Self {
        Self(units)
    }

    pub const fn units(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// 从浮点金额转换，拒绝非有限值、负数和小数部分
    pub fn try_from_f64(amount: f64) -> Result<Self> {
        if !amount.is_finite() {
            return Err(MedTourError::Validation(format!(
                "amount must be a finite number, got {}",
                amount
            )));
        }
        if amount < 0.0 {
            return Err(MedTourError::Validation(format!(
                "amount must not be negative, got {}",
                amount
            )));
        }
        if amount.fract() != 0.0 {
            return Err(MedTourError::Validation(format!(
                "amount must be a whole currency unit, got {}",
                amount
            )));
        }
        // i64::MAX 转为 f64 后是 2^63，本身已越界
        if amount >= i64::MAX as f64 {
            return Err(MedTourError::Validation(format!("amount {} is out of range", amount)));
        }
        Ok(Self(amount as i64))
    }

    /// 按基点比例计算份额，四舍五入（半数向上）到整数单位
    pub fn portion_bps(self, bps: u32) -> Result<Money> {
        if self.is_negative() {
            return Err(MedTourError::Validation(format!(
                "cannot take a portion of negative amount {}",
                self.0
            )));
        }
        Ok(Money(round_half_up_div(
            self.0 as i128 * bps as i128,
            BASIS_POINTS as i128,
        )))
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Money {
    fn from(units: i64) -> Self {
        Money(units)
    }
}

/// 非负整数除法，半数向上取整
fn round_half_up_div(numerator: i128, denominator: i128) -> i64 {
    ((numerator * 2 + denominator) / (denominator * 2)) as i64
}

/// 校验ISO 4217风格的货币代码（三位大写字母）
pub fn is_valid_currency(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_portion_rounds_half_up() {
        assert_eq!(Money::new(85_000).portion_bps(1500).unwrap(), Money::new(12_750));
        // 10 * 0.15 = 1.5 -> 2
        assert_eq!(Money::new(10).portion_bps(1500).unwrap(), Money::new(2));
        // 3 * 0.15 = 0.45 -> 0
        assert_eq!(Money::new(3).portion_bps(1500).unwrap(), Money::new(0));
        assert_eq!(Money::ZERO.portion_bps(1500).unwrap(), Money::ZERO);
    }

    #[test]
    fn test_portion_rejects_negative() {
        assert!(matches!(
            Money::new(-1).portion_bps(1500),
            Err(MedTourError::Validation(_))
        ));
    }

    #[test]
    fn test_try_from_f64() {
        assert_eq!(Money::try_from_f64(85000.0).unwrap(), Money::new(85_000));
        assert!(Money::try_from_f64(f64::NAN).is_err());
        assert!(Money::try_from_f64(f64::INFINITY).is_err());
        assert!(Money::try_from_f64(9_223_372_036_854_775_808.0).is_err());
        assert!(Money::try_from_f64(9_223_372_036_854_774_784.0).is_ok());
        assert!(Money::try_from_f64(-5.0).is_err());
        assert!(Money::try_from_f64(10.5).is_err());
    }

    #[test]
    fn test_is_valid_currency() {
        assert!(is_valid_currency("INR"));
        assert!(!is_valid_currency("inr"));
        assert!(!is_valid_currency("RUPEE"));
    }
}
