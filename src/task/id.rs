use std::fmt;

use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};

const ID_LENGTH: usize = 6;

/// A 6-char lowercase-alphanumeric task id (§3). Kept as its own wrapper type,
/// the way the teacher's `TaskId` wraps a `Uuid`, so call sites read `TaskId`
/// rather than a bare `String` — only the generation scheme changes. Backed
/// by a fixed-size byte array rather than a `String` so `TaskId` stays
/// `Copy`, matching how the rest of the engine passes it by value
/// (`TaskRegistry::with_task(&self, id: TaskId, ...)` and friends).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId([u8; ID_LENGTH]);

impl TaskId {
    /// Draws one random candidate. Uniqueness against the active set is the
    /// registry's job (`TaskRegistry::new_id`), not this constructor's —
    /// matches `task_manager.py::generate_task_id`'s loop-until-absent shape,
    /// which lives at the registry, not on the id type itself.
    pub fn random() -> Self {
        let mut bytes = [0u8; ID_LENGTH];
        let mut rng = rand::rng();
        for b in bytes.iter_mut() {
            *b = rng.sample(Alphanumeric).to_ascii_lowercase();
        }
        TaskId(bytes)
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).expect("TaskId bytes are always ASCII alphanumeric")
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_six_lowercase_alphanumeric_chars() {
        let id = TaskId::random();
        assert_eq!(id.as_str().len(), ID_LENGTH);
        assert!(id.as_str().chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn distinct_draws_are_overwhelmingly_likely_distinct() {
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| TaskId::random()).collect();
        assert!(ids.len() > 990);
    }
}
