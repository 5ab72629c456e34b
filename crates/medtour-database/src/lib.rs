//! # MedTour数据库模块
//!
//! 负责病例、报价与财务单据的PostgreSQL存储，提供连接池、表结构创建和 `CaseStore` 实现。
//! "每个病例至多一个被接受的报价"由部分唯一索引在存储层保证。

pub mod connection;
pub mod models;
pub mod queries;
pub mod store;

// 重新导出主要类型
pub use connection::DatabasePool;
pub use models::*;
pub use queries::DatabaseQueries;
pub use store::PgCaseStore;
