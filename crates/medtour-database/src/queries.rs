//! 数据库查询操作
//!
//! 连接级函数接受 `&mut PgConnection`，既可用于连接池连接，也可用于事务。

use crate::connection::DatabasePool;
use crate::models::*;
use medtour_core::{
    Case, CaseStatus, FinanceNote, FinanceStatus, JourneyStage, MedTourError, Quote, QuoteStatus,
    Result, TimelineEvent,
};
use sqlx::PgConnection;
use uuid::Uuid;

/// PostgreSQL 唯一约束冲突
const UNIQUE_VIOLATION: &str = "23505";

/// 将sqlx错误映射为领域错误；唯一约束冲突视为前置条件失败
pub fn map_db_error(err: sqlx::Error) -> MedTourError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return MedTourError::Precondition(db_err.message().to_string());
        }
    }
    MedTourError::from(err)
}

/// 数据库查询操作接口
pub struct DatabaseQueries<'a> {
    pool: &'a DatabasePool,
}

impl<'a> DatabaseQueries<'a> {
    pub fn new(pool: &'a DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建数据库表
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        // 创建病例表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS cases (
                id UUID PRIMARY KEY,
                patient_id UUID NOT NULL,
                treatment_id UUID,
                stage VARCHAR(16) NOT NULL DEFAULT 'Intake'
                    CHECK (stage IN ('Intake', 'TeleConsult', 'Deposit', 'Visa', 'Admit', 'Surgery', 'Rehab')),
                status VARCHAR(16) NOT NULL DEFAULT 'NEW'
                    CHECK (status IN ('NEW', 'QUOTED', 'ACCEPTED', 'CLOSED')),
                notes TEXT,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(map_db_error)?;

        // 创建病例时间线表（只追加）
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS case_timeline (
                seq BIGSERIAL PRIMARY KEY,
                case_id UUID NOT NULL REFERENCES cases(id),
                event TEXT NOT NULL,
                at TIMESTAMP WITH TIME ZONE NOT NULL
            )
        "#).execute(pool).await.map_err(map_db_error)?;

        // 创建报价表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS quotes (
                id UUID PRIMARY KEY,
                case_id UUID NOT NULL REFERENCES cases(id),
                doctor_id UUID NOT NULL,
                total BIGINT NOT NULL CHECK (total >= 0),
                currency VARCHAR(3) NOT NULL,
                status VARCHAR(16) NOT NULL DEFAULT 'SENT'
                    CHECK (status IN ('DRAFT', 'SENT', 'ACCEPTED')),
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(map_db_error)?;

        // 创建财务单据表，每个报价至多一张
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS finance_notes (
                id UUID PRIMARY KEY,
                case_id UUID NOT NULL REFERENCES cases(id),
                quote_id UUID NOT NULL UNIQUE REFERENCES quotes(id),
                total BIGINT NOT NULL,
                platform_fee BIGINT NOT NULL,
                provider_transfer BIGINT NOT NULL,
                profit BIGINT NOT NULL,
                currency VARCHAR(3) NOT NULL,
                status VARCHAR(16) NOT NULL DEFAULT 'PENDING'
                    CHECK (status IN ('PENDING', 'COMPLETED', 'REFUNDED')),
                payment_method VARCHAR(32) NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                CHECK (platform_fee + provider_transfer = total),
                CHECK (profit = platform_fee)
            )
        "#).execute(pool).await.map_err(map_db_error)?;

        self.create_indexes().await?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        let indexes = vec![
            "CREATE INDEX IF NOT EXISTS idx_cases_patient_id ON cases(patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_cases_status ON cases(status)",
            "CREATE INDEX IF NOT EXISTS idx_case_timeline_case_id ON case_timeline(case_id, seq)",
            "CREATE INDEX IF NOT EXISTS idx_quotes_case_id ON quotes(case_id)",
            // 每个病例至多一个被接受的报价
            "CREATE UNIQUE INDEX IF NOT EXISTS uq_quotes_one_accepted_per_case ON quotes(case_id) WHERE status = 'ACCEPTED'",
            "CREATE INDEX IF NOT EXISTS idx_finance_notes_case_id ON finance_notes(case_id)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql)
                .execute(pool)
                .await
                .map_err(map_db_error)?;
        }

        tracing::info!("Database indexes created successfully");
        Ok(())
    }
}

// ========== 病例相关操作 ==========

pub async fn insert_case(conn: &mut PgConnection, case: &Case) -> Result<()> {
    sqlx::query(r#"
        INSERT INTO cases (id, patient_id, treatment_id, stage, status, notes, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    "#)
    .bind(case.id)
    .bind(case.patient_id)
    .bind(case.treatment_id)
    .bind(case.stage.as_str())
    .bind(case.status.as_str())
    .bind(&case.notes)
    .bind(case.created_at)
    .bind(case.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(map_db_error)?;

    for event in &case.timeline {
        append_timeline(conn, case.id, event).await?;
    }
    Ok(())
}

/// 根据ID查找病例（含完整时间线）
pub async fn get_case(conn: &mut PgConnection, id: Uuid) -> Result<Option<Case>> {
    let row = sqlx::query_as::<_, DbCase>("SELECT * FROM cases WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;

    let Some(row) = row else {
        return Ok(None);
    };

    let timeline = sqlx::query_as::<_, DbTimelineEvent>(
        "SELECT event, at FROM case_timeline WHERE case_id = $1 ORDER BY seq"
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_db_error)?;

    row.into_case(timeline.into_iter().map(TimelineEvent::from).collect())
        .map(Some)
}

/// 更新病例状态；`expected` 不为空时只在当前状态匹配时更新
pub async fn update_case_status(
    conn: &mut PgConnection,
    id: Uuid,
    status: CaseStatus,
    expected: Option<CaseStatus>,
) -> Result<()> {
    let result = sqlx::query(r#"
        UPDATE cases SET status = $1, updated_at = NOW()
        WHERE id = $2 AND ($3::VARCHAR IS NULL OR status = $3)
    "#)
    .bind(status.as_str())
    .bind(id)
    .bind(expected.map(|s| s.as_str()))
    .execute(&mut *conn)
    .await
    .map_err(map_db_error)?;

    if result.rows_affected() == 0 {
        return Err(case_write_miss(conn, id, expected).await);
    }
    Ok(())
}

pub async fn update_case_stage(conn: &mut PgConnection, id: Uuid, stage: JourneyStage) -> Result<()> {
    let result = sqlx::query("UPDATE cases SET stage = $1, updated_at = NOW() WHERE id = $2")
        .bind(stage.as_str())
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(map_db_error)?;

    if result.rows_affected() == 0 {
        return Err(MedTourError::NotFound(format!("Case {} not found", id)));
    }
    Ok(())
}

/// 锁定病例行，并校验病例存在且（可选）处于期望状态与阶段，不修改任何字段
pub async fn lock_case(
    conn: &mut PgConnection,
    id: Uuid,
    expected_status: Option<CaseStatus>,
    expected_stage: Option<JourneyStage>,
) -> Result<()> {
    let row: Option<(String, String)> =
        sqlx::query_as("SELECT status, stage FROM cases WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_db_error)?;

    let Some((status, stage)) = row else {
        return Err(MedTourError::NotFound(format!("Case {} not found", id)));
    };
    if let Some(expected) = expected_status {
        if status != expected.as_str() {
            return Err(MedTourError::Precondition(format!(
                "Case {} is {}, expected {}",
                id,
                status,
                expected.as_str()
            )));
        }
    }
    if let Some(expected) = expected_stage {
        if stage != expected.as_str() {
            return Err(MedTourError::Precondition(format!(
                "Case {} is at stage {}, expected {}",
                id,
                stage,
                expected.as_str()
            )));
        }
    }
    Ok(())
}

pub async fn append_timeline(conn: &mut PgConnection, case_id: Uuid, event: &TimelineEvent) -> Result<()> {
    sqlx::query("INSERT INTO case_timeline (case_id, event, at) VALUES ($1, $2, $3)")
        .bind(case_id)
        .bind(&event.event)
        .bind(event.at)
        .execute(&mut *conn)
        .await
        .map_err(map_db_error)?;
    Ok(())
}

async fn case_write_miss(conn: &mut PgConnection, id: Uuid, expected: Option<CaseStatus>) -> MedTourError {
    let actual: std::result::Result<Option<String>, sqlx::Error> =
        sqlx::query_scalar("SELECT status FROM cases WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await;

    match actual {
        Ok(None) => MedTourError::NotFound(format!("Case {} not found", id)),
        Ok(Some(actual)) => MedTourError::Precondition(format!(
            "Case {} is {}, expected {}",
            id,
            actual,
            expected.map(|s| s.as_str()).unwrap_or("any")
        )),
        Err(e) => map_db_error(e),
    }
}

// ========== 报价相关操作 ==========

pub async fn insert_quote(conn: &mut PgConnection, quote: &Quote) -> Result<()> {
    sqlx::query(r#"
        INSERT INTO quotes (id, case_id, doctor_id, total, currency, status, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    "#)
    .bind(quote.id)
    .bind(quote.case_id)
    .bind(quote.doctor_id)
    .bind(quote.total.units())
    .bind(&quote.currency)
    .bind(quote.status.as_str())
    .bind(quote.created_at)
    .bind(quote.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(map_db_error)?;
    Ok(())
}

pub async fn get_quote(conn: &mut PgConnection, id: Uuid) -> Result<Option<Quote>> {
    let row = sqlx::query_as::<_, DbQuote>("SELECT * FROM quotes WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;

    row.map(Quote::try_from).transpose()
}

pub async fn list_quotes(conn: &mut PgConnection, case_id: Uuid) -> Result<Vec<Quote>> {
    let rows = sqlx::query_as::<_, DbQuote>(
        "SELECT * FROM quotes WHERE case_id = $1 ORDER BY created_at"
    )
    .bind(case_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_db_error)?;

    rows.into_iter().map(Quote::try_from).collect()
}

/// 更新报价状态；`expected` 不为空时只在当前状态匹配时更新
pub async fn update_quote_status(
    conn: &mut PgConnection,
    id: Uuid,
    status: QuoteStatus,
    expected: Option<QuoteStatus>,
) -> Result<()> {
    let result = sqlx::query(r#"
        UPDATE quotes SET status = $1, updated_at = NOW()
        WHERE id = $2 AND ($3::VARCHAR IS NULL OR status = $3)
    "#)
    .bind(status.as_str())
    .bind(id)
    .bind(expected.map(|s| s.as_str()))
    .execute(&mut *conn)
    .await
    .map_err(map_db_error)?;

    if result.rows_affected() == 0 {
        return match get_quote(conn, id).await? {
            None => Err(MedTourError::NotFound(format!("Quote {} not found", id))),
            Some(quote) => Err(MedTourError::Precondition(format!(
                "Quote {} is {:?}, expected {:?}",
                id, quote.status, expected
            ))),
        };
    }
    Ok(())
}

// ========== 财务单据相关操作 ==========

pub async fn insert_finance_note(conn: &mut PgConnection, note: &FinanceNote) -> Result<()> {
    sqlx::query(r#"
        INSERT INTO finance_notes
            (id, case_id, quote_id, total, platform_fee, provider_transfer, profit, currency, status, payment_method, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
    "#)
    .bind(note.id)
    .bind(note.case_id)
    .bind(note.quote_id)
    .bind(note.total.units())
    .bind(note.platform_fee.units())
    .bind(note.provider_transfer.units())
    .bind(note.profit.units())
    .bind(&note.currency)
    .bind(note.status.as_str())
    .bind(note.payment_method.as_str())
    .bind(note.created_at)
    .execute(&mut *conn)
    .await
    .map_err(map_db_error)?;
    Ok(())
}

pub async fn get_finance_note(conn: &mut PgConnection, id: Uuid) -> Result<Option<FinanceNote>> {
    let row = sqlx::query_as::<_, DbFinanceNote>("SELECT * FROM finance_notes WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;

    row.map(FinanceNote::try_from).transpose()
}

pub async fn get_finance_note_by_quote(conn: &mut PgConnection, quote_id: Uuid) -> Result<Option<FinanceNote>> {
    let row = sqlx::query_as::<_, DbFinanceNote>("SELECT * FROM finance_notes WHERE quote_id = $1")
        .bind(quote_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;

    row.map(FinanceNote::try_from).transpose()
}

/// 更新财务单据状态；`expected` 不为空时只在当前状态匹配时更新
pub async fn update_finance_status(
    conn: &mut PgConnection,
    id: Uuid,
    status: FinanceStatus,
    expected: Option<FinanceStatus>,
) -> Result<()> {
    let result = sqlx::query(r#"
        UPDATE finance_notes SET status = $1
        WHERE id = $2 AND ($3::VARCHAR IS NULL OR status = $3)
    "#)
    .bind(status.as_str())
    .bind(id)
    .bind(expected.map(|s| s.as_str()))
    .execute(&mut *conn)
    .await
    .map_err(map_db_error)?;

    if result.rows_affected() == 0 {
        return match get_finance_note(conn, id).await? {
            None => Err(MedTourError::NotFound(format!("Finance note {} not found", id))),
            Some(note) => Err(MedTourError::Precondition(format!(
                "Finance note {} is {:?}, expected {:?}",
                id, note.status, expected
            ))),
        };
    }
    Ok(())
}
