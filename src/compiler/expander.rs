use crate::dsl::{Process, Activity, ActivityType, SequenceFlow};
use crate::runtime::definition::MULTI_INSTANCE_BODY_SUFFIX;
use anyhow::{Result, anyhow};

/// An activity lifted out of its nesting, remembering the container it was declared in.
#[derive(Debug, Clone)]
pub struct ExpandedActivity {
    pub activity: Activity,
    /// Id of the enclosing sub-process; `None` for the process scope.
    pub parent_scope: Option<String>,
    /// Set on a generated multi-instance body: id of the activity it repeats.
    pub body_of: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExpandedProcess {
    pub id: String,
    pub name: Option<String>,
    pub version: u32,
    pub activities: Vec<ExpandedActivity>,
    pub flows: Vec<SequenceFlow>,
}

pub struct Expander {
    max_depth: usize,
}

impl Expander {
    pub fn new() -> Self {
        Self { max_depth: 32 }
    }

    /// 将嵌套的子流程展开为扁平列表，容器总是排在其内部活动之前
    pub fn expand(&self, process: Process) -> Result<ExpandedProcess> {
        let mut activities = Vec::new();
        for activity in process.activities {
            self.expand_activity(activity, None, 0, &mut activities)?;
        }

        Ok(ExpandedProcess {
            id: process.id,
            name: process.name,
            version: process.version,
            activities,
            flows: process.flows,
        })
    }

    fn expand_activity(
        &self,
        mut activity: Activity,
        parent_scope: Option<String>,
        depth: usize,
        out: &mut Vec<ExpandedActivity>,
    ) -> Result<()> {
        if depth > self.max_depth {
            return Err(anyhow!(
                "Sub-process nesting deeper than {} levels at '{}'",
                self.max_depth,
                activity.id
            ));
        }

        let nested = match &mut activity.kind {
            ActivityType::SubProcess { activities } | ActivityType::EventSubProcess { activities, .. } => {
                std::mem::take(activities)
            }
            _ => Vec::new(),
        };

        // 多实例活动被包进一个生成的 body 作用域
        let parent_scope = match activity.multi_instance.take() {
            Some(multi_instance) => {
                if !matches!(activity.kind, ActivityType::Task | ActivityType::SubProcess { .. }) {
                    return Err(anyhow!("Activity '{}' cannot be multi-instance", activity.id));
                }
                if multi_instance.cardinality == 0 {
                    return Err(anyhow!("Multi-instance activity '{}' needs a cardinality of at least 1", activity.id));
                }
                let body_id = format!("{}{}", activity.id, MULTI_INSTANCE_BODY_SUFFIX);
                let mut body = Activity::new(&body_id, ActivityType::SubProcess { activities: Vec::new() });
                body.name = activity.name.clone();
                body.multi_instance = Some(multi_instance);
                out.push(ExpandedActivity {
                    activity: body,
                    parent_scope,
                    body_of: Some(activity.id.clone()),
                });
                Some(body_id)
            }
            None => parent_scope,
        };

        let container_id = activity.id.clone();
        out.push(ExpandedActivity {
            activity,
            parent_scope,
            body_of: None,
        });

        for child in nested {
            self.expand_activity(child, Some(container_id.clone()), depth + 1, out)?;
        }
        Ok(())
    }
}
