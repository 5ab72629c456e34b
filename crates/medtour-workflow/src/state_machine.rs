//! 病例状态机
//!
//! 管理两套并存的状态：就诊旅程阶段（七阶段，面向患者展示）和报价工作流状态
//! （New → Quoted → Accepted → Closed）。

use crate::timeline;
use medtour_core::{Case, CaseStatus, JourneyStage, MedTourError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 工作流状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CaseEvent {
    QuoteIssued,
    QuoteAccepted,
    Closed,
}

/// 病例状态机
#[derive(Debug)]
pub struct CaseStateMachine {
    transitions: HashMap<(CaseStatus, CaseEvent), CaseStatus>,
}

impl CaseStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        transitions.insert((CaseStatus::New, CaseEvent::QuoteIssued), CaseStatus::Quoted);
        transitions.insert((CaseStatus::Quoted, CaseEvent::QuoteAccepted), CaseStatus::Accepted);
        transitions.insert((CaseStatus::New, CaseEvent::Closed), CaseStatus::Closed);
        transitions.insert((CaseStatus::Quoted, CaseEvent::Closed), CaseStatus::Closed);
        transitions.insert((CaseStatus::Accepted, CaseEvent::Closed), CaseStatus::Closed);

        Self { transitions }
    }

    /// 检查工作流状态转换是否有效
    pub fn can_transition(&self, from: CaseStatus, event: CaseEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// 执行工作流状态转换
    pub fn transition(&self, from: CaseStatus, event: CaseEvent) -> Result<CaseStatus> {
        self.transitions
            .get(&(from, event))
            .copied()
            .ok_or_else(|| MedTourError::InvalidStateTransition {
                from: format!("{:?}", from),
                event: format!("{:?}", event),
            })
    }

    /// 获取状态的所有可能事件
    pub fn get_possible_events(&self, current: CaseStatus) -> Vec<CaseEvent> {
        self.transitions
            .keys()
            .filter(|(state, _)| *state == current)
            .map(|(_, event)| *event)
            .collect()
    }

    /// 将病例移动到指定就诊阶段，返回更新后的副本。
    ///
    /// 阶段名称无效时返回 `InvalidStage`，原病例不变。允许回退到更早的阶段。
    pub fn transition_stage(&self, case: &Case, new_stage: &str) -> Result<Case> {
        let stage: JourneyStage = new_stage.parse()?;
        let mut updated = case.clone();
        let old_stage = updated.stage;
        updated.stage = stage;
        timeline::record(&mut updated, stage_change_text(old_stage, stage));
        updated.updated_at = chrono::Utc::now();

        if stage < old_stage {
            tracing::debug!("Case {} moved back from {} to {}", case.id, old_stage, stage);
        }
        Ok(updated)
    }
}

impl Default for CaseStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// 病例就诊阶段在有序列表中的位置
pub fn current_stage_index(case: &Case) -> usize {
    case.stage.index()
}

/// 就诊进度百分比：round((index + 1) / 7 * 100)
pub fn progress_percent(case: &Case) -> u8 {
    let done = (current_stage_index(case) + 1) as u32;
    let total = JourneyStage::ALL.len() as u32;
    ((done * 200 + total) / (total * 2)) as u8
}

pub(crate) fn stage_change_text(from: JourneyStage, to: JourneyStage) -> String {
    format!("Stage changed from {} to {}", from, to)
}
