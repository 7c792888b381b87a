use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::ProductKind;
use crate::error::StorefrontError;

/// One unlocked target for one user. The ledger is the source of truth for
/// ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub user_id: String,
    pub target_id: String,
    pub target_type: ProductKind,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait EnrollmentLedger: Send + Sync {
    /// Upsert keyed by `(user_id, target_id)`. Returns `false` when the row
    /// already existed, which is not an error.
    async fn grant(&self, enrollment: &Enrollment) -> Result<bool, StorefrontError>;
    async fn list_enrollments(&self, user_id: &str) -> Result<Vec<Enrollment>, StorefrontError>;
}

/// Target ids the ledger says a user owns.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    targets: HashSet<String>,
}

impl LedgerSnapshot {
    pub async fn load(ledger: &dyn EnrollmentLedger, user_id: &str) -> Result<Self, StorefrontError> {
        let rows = ledger.list_enrollments(user_id).await?;
        Ok(Self::from_targets(rows.into_iter().map(|e| e.target_id)))
    }

    pub fn from_targets<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, target_id: &str) -> bool {
        self.targets.contains(target_id)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use tempfile::tempdir;

    fn row(user: &str, target: &str) -> Enrollment {
        Enrollment {
            user_id: user.into(),
            target_id: target.into(),
            target_type: ProductKind::Subject,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn grant_is_an_upsert() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("ledger.db").to_str().unwrap())
            .await
            .unwrap();

        assert!(db.grant(&row("u1", "physics")).await.unwrap());
        assert!(!db.grant(&row("u1", "physics")).await.unwrap());
        assert!(db.grant(&row("u1", "chemistry")).await.unwrap());
        assert!(db.grant(&row("u2", "physics")).await.unwrap());

        let snapshot = LedgerSnapshot::load(&db, "u1").await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains("physics"));
        assert!(snapshot.contains("chemistry"));
        assert!(!snapshot.contains("biology"));
        assert!(!snapshot.is_empty());

        let stranger = LedgerSnapshot::load(&db, "u3").await.unwrap();
        assert!(stranger.is_empty());
        assert_eq!(stranger.len(), 0);
    }
}
