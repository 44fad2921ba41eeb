//! Key-path helpers for the tasks subtree.

use maestro_core::TaskId;

/// Root prefix for all task subtrees.
pub const TASKS_PREFIX: &str = "_maestro/tasks";

/// Prefix of one task's subtree (with trailing slash).
#[must_use]
pub fn task_prefix(task_id: &TaskId) -> String {
    format!("{TASKS_PREFIX}/{task_id}/")
}

/// Key holding the task's target deployment.
#[must_use]
pub fn target_key(task_id: &TaskId) -> String {
    format!("{TASKS_PREFIX}/{task_id}/targetId")
}

/// Key holding the task's type.
#[must_use]
pub fn type_key(task_id: &TaskId) -> String {
    format!("{TASKS_PREFIX}/{task_id}/type")
}

/// Key holding the task's status.
#[must_use]
pub fn status_key(task_id: &TaskId) -> String {
    format!("{TASKS_PREFIX}/{task_id}/status")
}

/// Key of one data entry.
#[must_use]
pub fn data_key(task_id: &TaskId, key: &str) -> String {
    format!("{TASKS_PREFIX}/{task_id}/data/{key}")
}

/// Prefix of the task's data subtree.
#[must_use]
pub fn data_prefix(task_id: &TaskId) -> String {
    format!("{TASKS_PREFIX}/{task_id}/data/")
}

/// Key holding the task's result set.
#[must_use]
pub fn result_set_key(task_id: &TaskId) -> String {
    format!("{TASKS_PREFIX}/{task_id}/resultSet")
}

/// The advisory cancellation sentinel.
#[must_use]
pub fn canceled_flag_key(task_id: &TaskId) -> String {
    format!("{TASKS_PREFIX}/{task_id}/.canceledFlag")
}

/// Key of one step's status.
#[must_use]
pub fn step_key(task_id: &TaskId, step_name: &str) -> String {
    format!("{TASKS_PREFIX}/{task_id}/steps/{step_name}")
}

/// Prefix of the task's steps subtree.
#[must_use]
pub fn steps_prefix(task_id: &TaskId) -> String {
    format!("{TASKS_PREFIX}/{task_id}/steps/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_stable() {
        let id = TaskId::generate();
        assert_eq!(status_key(&id), format!("_maestro/tasks/{id}/status"));
        assert_eq!(
            canceled_flag_key(&id),
            format!("_maestro/tasks/{id}/.canceledFlag")
        );
        assert_eq!(
            data_key(&id, "inputs/user"),
            format!("_maestro/tasks/{id}/data/inputs/user")
        );
    }
}
