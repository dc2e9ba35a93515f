pub mod builder;

use std::collections::HashMap;
use serde::{Serialize, Deserialize};
use serde_json::Value;

/// 原始 DSL 定义的流程
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Process {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_version")]
    pub version: u32,
    pub activities: Vec<Activity>,
    /// Sequence flows of every scope, sub-process bodies included.
    #[serde(default)]
    pub flows: Vec<SequenceFlow>,
}

fn default_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// DSL 中的活动类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ActivityType {
    StartEvent,
    EndEvent,
    Task,
    Gateway,
    IntermediateEvent,
    SubProcess {
        #[serde(default)]
        activities: Vec<Activity>,
    },
    EventSubProcess {
        #[serde(default = "default_true")]
        interrupting: bool,
        #[serde(default)]
        activities: Vec<Activity>,
    },
    BoundaryEvent {
        attached_to: String,
        #[serde(default = "default_true")]
        cancel_activity: bool,
        #[serde(default)]
        compensation: bool,
    },
}

/// DSL 中的活动
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Activity {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: ActivityType,
    /// Executions arriving here wait before entering the activity.
    #[serde(default)]
    pub async_before: bool,
    /// Forces a scope execution even when nothing else requires one.
    #[serde(default)]
    pub scope: bool,
    /// Constant input mappings, written as local variables on start.
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    /// Runs the activity several times inside a generated body scope.
    #[serde(default)]
    pub multi_instance: Option<MultiInstance>,
    /// The scope execution stays when everything inside it is cancelled.
    #[serde(default)]
    pub preserve_scope: bool,
}

/// 多实例设置
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MultiInstance {
    #[serde(default)]
    pub sequential: bool,
    pub cardinality: u32,
}

impl Activity {
    pub fn new(id: &str, kind: ActivityType) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            kind,
            async_before: false,
            scope: false,
            inputs: HashMap::new(),
            multi_instance: None,
            preserve_scope: false,
        }
    }

    /// Nested body of a sub-process or event sub-process.
    pub fn nested_activities(&self) -> Option<&[Activity]> {
        match &self.kind {
            ActivityType::SubProcess { activities } | ActivityType::EventSubProcess { activities, .. } => {
                Some(activities)
            }
            _ => None,
        }
    }
}

/// DSL 中的顺序流
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SequenceFlow {
    pub id: String,
    pub source: String,
    pub target: String,
}
