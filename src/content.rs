use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::ProductKind;
use crate::error::StorefrontError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterialKind {
    Pdf,
    Video,
    Link,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    pub id: String,
    pub title: String,
    pub kind: MaterialKind,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub question_count: u32,
    #[serde(default)]
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub materials: Vec<Material>,
    #[serde(default)]
    pub quizzes: Vec<Quiz>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub topics: Vec<Topic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentTree {
    #[serde(default)]
    pub subjects: Vec<Subject>,
}

impl ContentTree {
    /// Gateable ids (subjects, chapters, materials) and the kind of unit each names.
    pub fn target_index(&self) -> HashMap<String, ProductKind> {
        let mut index = HashMap::new();
        for subject in &self.subjects {
            index.insert(subject.id.clone(), ProductKind::Subject);
            for chapter in &subject.chapters {
                index.insert(chapter.id.clone(), ProductKind::Chapter);
                for topic in &chapter.topics {
                    for material in &topic.materials {
                        index.insert(material.id.clone(), ProductKind::Material);
                    }
                }
            }
        }
        index
    }

    /// Every id in the tree must be unique, topics and quizzes included.
    pub fn validate(&self) -> Result<(), StorefrontError> {
        let mut seen = std::collections::HashSet::new();
        let mut check = |id: &str| -> Result<(), StorefrontError> {
            if id.trim().is_empty() {
                return Err(StorefrontError::Validation("content ids must not be empty".into()));
            }
            if !seen.insert(id.to_string()) {
                return Err(StorefrontError::Validation(format!("duplicate content id `{id}`")));
            }
            Ok(())
        };
        for subject in &self.subjects {
            check(&subject.id)?;
            for chapter in &subject.chapters {
                check(&chapter.id)?;
                for topic in &chapter.topics {
                    check(&topic.id)?;
                    for material in &topic.materials {
                        check(&material.id)?;
                    }
                    for quiz in &topic.quizzes {
                        check(&quiz.id)?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentTreeRecord {
    pub tree: ContentTree,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<String>,
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn get_content_tree(&self) -> Result<ContentTreeRecord, StorefrontError>;
    async fn put_content_tree(
        &self,
        tree: ContentTree,
        updated_by: Option<String>,
    ) -> Result<ContentTreeRecord, StorefrontError>;
}
