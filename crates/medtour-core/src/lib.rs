//! # MedTour Core
//!
//! 医疗旅游病例系统的核心模块，提供病例、报价、财务单据等基础数据结构、错误定义和金额工具。

pub mod error;
pub mod models;
pub mod utils;

pub use error::{MedTourError, Result};
pub use models::*;
pub use utils::Money;
