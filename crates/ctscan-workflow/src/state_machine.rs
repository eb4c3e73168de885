//! 扫描状态机
//!
//! 管理一次扫描从载入患者到保存记录的状态转换

use ctscan_core::{CtScanError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 扫描工作流状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScanState {
    Idle,
    Ready,
    Captured,
    Classified,
    Saved,
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// 状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScanEvent {
    PatientLoaded,
    ImageAcquired,
    ImageChanged,
    ImageRemoved,
    Classified,
    Saved,
    NewScan,
    HistoryViewed,
    ReportHandedOff,
    SignedOut,
}

/// 扫描状态机
#[derive(Debug)]
pub struct ScanStateMachine {
    transitions: HashMap<(ScanState, ScanEvent), ScanState>,
}

impl ScanStateMachine {
    pub fn new() -> Self {
        use ScanEvent::*;
        use ScanState::*;

        let mut transitions = HashMap::new();

        transitions.insert((Idle, PatientLoaded), Ready);
        transitions.insert((Ready, ImageAcquired), Captured);
        transitions.insert((Captured, ImageChanged), Captured);
        transitions.insert((ScanState::Classified, ImageChanged), Captured);
        transitions.insert((Captured, ImageRemoved), Ready);
        transitions.insert((ScanState::Classified, ImageRemoved), Ready);
        transitions.insert((Captured, ScanEvent::Classified), ScanState::Classified);
        transitions.insert((ScanState::Classified, ScanEvent::Saved), ScanState::Saved);
        transitions.insert((ScanState::Saved, NewScan), Ready);
        transitions.insert((ScanState::Saved, HistoryViewed), ScanState::Saved);
        transitions.insert((ScanState::Saved, ReportHandedOff), ScanState::Saved);

        // 任何状态都可以登出
        for state in Self::get_all_states() {
            transitions.insert((state, SignedOut), Idle);
        }

        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: ScanState, event: ScanEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// 执行状态转换
    pub fn transition(&self, from: ScanState, event: ScanEvent) -> Result<ScanState> {
        match self.transitions.get(&(from, event)) {
            Some(to) => Ok(*to),
            None => Err(CtScanError::InvalidStateTransition {
                from: format!("{:?}", from),
                event: format!("{:?}", event),
            }),
        }
    }

    pub fn get_all_states() -> Vec<ScanState> {
        vec![
            ScanState::Idle,
            ScanState::Ready,
            ScanState::Captured,
            ScanState::Classified,
            ScanState::Saved,
        ]
    }

    /// 获取状态的所有可能事件
    pub fn get_possible_events(&self, current_state: ScanState) -> Vec<ScanEvent> {
        self.transitions
            .keys()
            .filter(|(state, _)| *state == current_state)
            .map(|(_, event)| *event)
            .collect()
    }
}

impl Default for ScanStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
