//! 命令活动记录（CommandActivity）
//!
//! 注册表把每个命令的生命周期转成可序列化的活动记录，经广播流对外发布，
//! 便于实现忙碌指示、审计日志等横切关注点。
//!
use crate::event_args::ExecutionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityKind {
    /// 执行前事件已发出；不代表执行体已运行，被取消时随后是 `Cancelled`
    Started,
    Cancelled,
    Completed,
    Failed { reason: String, handled: bool },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandActivity {
    pub execution_id: ExecutionId,
    pub command: String,
    #[serde(flatten)]
    pub kind: ActivityKind,
    pub occurred_at: DateTime<Utc>,
}

impl CommandActivity {
    pub(crate) fn new(execution_id: ExecutionId, command: &str, kind: ActivityKind) -> Self {
        Self {
            execution_id,
            command: command.to_string(),
            kind,
            occurred_at: Utc::now(),
        }
    }

    /// 是否为该次执行的终态记录
    pub fn is_terminal(&self) -> bool {
        !matches!(self.kind, ActivityKind::Started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_flat_with_kind_tag() {
        let activity = CommandActivity::new(
            ExecutionId::new(),
            "save",
            ActivityKind::Failed {
                reason: "disk full".into(),
                handled: false,
            },
        );
        let json = serde_json::to_value(&activity).unwrap();
        assert_eq!(
            json["execution_id"],
            activity.execution_id.as_uuid().to_string()
        );
        assert_eq!(json["command"], "save");
        assert_eq!(json["kind"], "failed");
        assert_eq!(json["reason"], "disk full");
        assert_eq!(json["handled"], false);
        assert!(json["occurred_at"].is_string());

        let back: CommandActivity = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind, activity.kind);
        assert_eq!(back.execution_id, activity.execution_id);
    }

    #[test]
    fn only_started_is_non_terminal() {
        let id = ExecutionId::new();
        assert!(!CommandActivity::new(id, "a", ActivityKind::Started).is_terminal());
        assert!(CommandActivity::new(id, "a", ActivityKind::Cancelled).is_terminal());
        assert!(CommandActivity::new(id, "a", ActivityKind::Completed).is_terminal());
    }
}
