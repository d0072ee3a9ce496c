use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::models::validate_id;

/// A document returned by a collection listing.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct Document {
    /// Last path segment.
    pub id: String,
    pub data: Value,
}

/// Hierarchical document store scoped per user, addressed by slash paths
/// such as `users/{uid}/workouts/{id}`. Writes to the same path overwrite.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get_document(&self, path: &str) -> Result<Option<Value>>;
    async fn list_documents(&self, collection: &str) -> Result<Vec<Document>>;
    async fn set_document(&self, path: &str, data: &Value) -> Result<()>;
    async fn delete_document(&self, path: &str) -> Result<()>;
    /// Delete every document directly inside `collection`. Returns how many went.
    async fn delete_collection(&self, collection: &str) -> Result<usize>;
}

/// Who the remote data belongs to.
pub trait UserIdentity: Send + Sync {
    fn current_user_id(&self) -> Option<String>;
}

/// Fixed identity, typically from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(pub Option<String>);

impl UserIdentity for StaticIdentity {
    fn current_user_id(&self) -> Option<String> {
        self.0.clone().filter(|id| !id.trim().is_empty())
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no signed-in user; remote store unavailable")]
    NoUser,
    #[error("remote store returned {status}: {message}")]
    Remote { status: u16, message: String },
}

pub fn to_document<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).context("Failed to encode remote document")
}

pub fn from_document<T: DeserializeOwned>(path: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).with_context(|| format!("Malformed remote document at {path}"))
}

/// Remote layout, one function per collection or document.
pub mod paths {
    use anyhow::Result;

    use super::validate_id;

    fn user(uid: &str) -> Result<String> {
        validate_id(uid)?;
        Ok(format!("users/{uid}"))
    }

    pub fn workouts(uid: &str) -> Result<String> {
        Ok(format!("{}/workouts", user(uid)?))
    }

    pub fn workout(uid: &str, workout_id: &str) -> Result<String> {
        validate_id(workout_id)?;
        Ok(format!("{}/{workout_id}", workouts(uid)?))
    }

    pub fn assigned_exercises(uid: &str, workout_id: &str) -> Result<String> {
        Ok(format!("{}/assignedExercises", workout(uid, workout_id)?))
    }

    pub fn assigned_exercise(uid: &str, workout_id: &str, exercise_id: &str) -> Result<String> {
        validate_id(exercise_id)?;
        Ok(format!(
            "{}/{exercise_id}",
            assigned_exercises(uid, workout_id)?
        ))
    }

    pub fn route_records(uid: &str) -> Result<String> {
        Ok(format!("{}/routeRecords", user(uid)?))
    }

    pub fn route_record(uid: &str, session_id: &str) -> Result<String> {
        validate_id(session_id)?;
        Ok(format!("{}/{session_id}", route_records(uid)?))
    }

    pub fn route_points(uid: &str, session_id: &str) -> Result<String> {
        Ok(format!("{}/points", route_record(uid, session_id)?))
    }

    pub fn route_point(uid: &str, session_id: &str, point_uuid: &str) -> Result<String> {
        validate_id(point_uuid)?;
        Ok(format!("{}/{point_uuid}", route_points(uid, session_id)?))
    }

    pub fn workout_summaries(uid: &str) -> Result<String> {
        Ok(format!("{}/workoutSummaries", user(uid)?))
    }

    pub fn workout_summary(uid: &str, summary_id: &str) -> Result<String> {
        validate_id(summary_id)?;
        Ok(format!("{}/{summary_id}", workout_summaries(uid)?))
    }

    /// Split a document path into `(collection, id)`.
    #[must_use]
    pub fn split(path: &str) -> Option<(&str, &str)> {
        let (collection, id) = path.rsplit_once('/')?;
        (!collection.is_empty() && !id.is_empty()).then_some((collection, id))
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use serde_json::Value;

    use super::{Document, RemoteStore, paths};

    /// In-memory remote with switchable failures.
    #[derive(Default)]
    pub(crate) struct FakeRemote {
        docs: Mutex<BTreeMap<String, Value>>,
        offline: AtomicBool,
        failing: Mutex<Vec<String>>,
        failing_exact: Mutex<Vec<String>>,
        writes: AtomicUsize,
        delay: Mutex<Option<Duration>>,
    }

    impl FakeRemote {
        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        /// Any operation on a path containing `fragment` fails.
        pub fn fail_paths_containing(&self, fragment: &str) {
            self.failing.lock().unwrap().push(fragment.to_string());
        }

        /// Only operations on exactly `path` fail.
        pub fn fail_exact_path(&self, path: &str) {
            self.failing_exact.lock().unwrap().push(path.to_string());
        }

        pub fn clear_failures(&self) {
            self.failing.lock().unwrap().clear();
            self.failing_exact.lock().unwrap().clear();
        }

        pub fn set_write_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = Some(delay);
        }

        pub fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }

        pub fn doc(&self, path: &str) -> Option<Value> {
            self.docs.lock().unwrap().get(path).cloned()
        }

        pub fn insert(&self, path: &str, value: Value) {
            self.docs.lock().unwrap().insert(path.to_string(), value);
        }

        pub fn count_in(&self, collection: &str) -> usize {
            self.docs
                .lock()
                .unwrap()
                .keys()
                .filter(|p| paths::split(p).is_some_and(|(c, _)| c == collection))
                .count()
        }

        fn check(&self, path: &str) -> Result<()> {
            if self.offline.load(Ordering::SeqCst) {
                bail!("remote unreachable");
            }
            if self
                .failing
                .lock()
                .unwrap()
                .iter()
                .any(|f| path.contains(f.as_str()))
            {
                bail!("request rejected: {path}");
            }
            if self.failing_exact.lock().unwrap().iter().any(|f| f == path) {
                bail!("request rejected: {path}");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RemoteStore for FakeRemote {
        async fn get_document(&self, path: &str) -> Result<Option<Value>> {
            self.check(path)?;
            Ok(self.doc(path))
        }

        async fn list_documents(&self, collection: &str) -> Result<Vec<Document>> {
            self.check(collection)?;
            let docs = self.docs.lock().unwrap();
            Ok(docs
                .iter()
                .filter_map(|(path, data)| {
                    let (c, id) = paths::split(path)?;
                    (c == collection).then(|| Document {
                        id: id.to_string(),
                        data: data.clone(),
                    })
                })
                .collect())
        }

        async fn set_document(&self, path: &str, data: &Value) -> Result<()> {
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.check(path)?;
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.insert(path, data.clone());
            Ok(())
        }

        async fn delete_document(&self, path: &str) -> Result<()> {
            self.check(path)?;
            self.docs.lock().unwrap().remove(path);
            Ok(())
        }

        async fn delete_collection(&self, collection: &str) -> Result<usize> {
            self.check(collection)?;
            let mut docs = self.docs.lock().unwrap();
            let before = docs.len();
            docs.retain(|p, _| paths::split(p).is_none_or(|(c, _)| c != collection));
            Ok(before - docs.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(paths::workout("u1", "w1").unwrap(), "users/u1/workouts/w1");
        assert_eq!(
            paths::assigned_exercise("u1", "w1", "e1").unwrap(),
            "users/u1/workouts/w1/assignedExercises/e1"
        );
        assert_eq!(
            paths::route_point("u1", "s1", "p1").unwrap(),
            "users/u1/routeRecords/s1/points/p1"
        );
        assert_eq!(
            paths::workout_summary("u1", "x").unwrap(),
            "users/u1/workoutSummaries/x"
        );
        assert!(paths::workout("u/1", "w1").is_err());
        assert!(paths::workout("u1", "").is_err());
    }

    #[test]
    fn test_split() {
        assert_eq!(
            paths::split("users/u1/workouts/w1"),
            Some(("users/u1/workouts", "w1"))
        );
        assert_eq!(paths::split("w1"), None);
        assert_eq!(paths::split("users/"), None);
    }

    #[test]
    fn test_static_identity() {
        assert_eq!(StaticIdentity(None).current_user_id(), None);
        assert_eq!(StaticIdentity(Some("  ".into())).current_user_id(), None);
        assert_eq!(
            StaticIdentity(Some("u1".into())).current_user_id().as_deref(),
            Some("u1")
        );
    }
}
