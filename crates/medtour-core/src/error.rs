//! 错误定义模块

use thiserror::Error;

/// MedTour系统统一错误类型
#[derive(Error, Debug)]
pub enum MedTourError {
    #[error("验证错误: {0}")]
    Validation(String),

    #[error("无效的就诊阶段: {0}")]
    InvalidStage(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("前置条件不满足: {0}")]
    Precondition(String),

    #[error("无效状态转换: 从 {from} 经 {event}")]
    InvalidStateTransition { from: String, event: String },

    #[error("持久化错误: {0}")]
    Persistence(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl MedTourError {
    /// 是否属于调用方可修正的错误（而非存储层故障）
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            MedTourError::Validation(_)
                | MedTourError::InvalidStage(_)
                | MedTourError::NotFound(_)
                | MedTourError::Precondition(_)
                | MedTourError::InvalidStateTransition { .. }
        )
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for MedTourError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => MedTourError::NotFound("row not found".to_string()),
            other => MedTourError::Persistence(other.to_string()),
        }
    }
}

/// MedTour系统统一结果类型
pub type Result<T> = std::result::Result<T, MedTourError>;
