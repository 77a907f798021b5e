//! Import plan derived from a classification run
//!
//! EXACT_MATCH and DRIFTED resources already exist in the target and are
//! imported (drifted ones flagged for review); NEW resources are created.
//! ORPHANED targets are left alone.

use crate::classify::{ClassificationState, ResourceClassification};
use serde::{Deserialize, Serialize};

/// Bring an existing target resource under management
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDirective {
    /// Abstracted id of the source resource
    pub abstracted_id: String,
    /// Provider/type string
    pub resource_type: String,
    /// Physical id in the target
    pub target_id: String,
    /// Target differs from the source; review before apply
    pub drifted: bool,
}

/// Create a resource that does not exist in the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDirective {
    /// Abstracted id of the source resource
    pub abstracted_id: String,
    /// Provider/type string
    pub resource_type: String,
    /// Resource name
    pub name: String,
    /// NEW only because the id could not be resolved
    pub defaulted: bool,
}

/// Import and create directives for a deployment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportPlan {
    /// Existing resources to import
    pub imports: Vec<ImportDirective>,
    /// Resources to create
    pub creates: Vec<CreateDirective>,
}

impl ImportPlan {
    /// Build from classifications
    #[must_use]
    pub fn from_classifications(classifications: &[ResourceClassification]) -> Self {
        let mut plan = Self::default();
        for classification in classifications {
            let Some(abstracted) = &classification.abstracted else {
                continue;
            };
            match classification.classification {
                ClassificationState::ExactMatch | ClassificationState::Drifted => {
                    let Some(target_id) = classification.target.as_ref().and_then(|t| t.id()) else {
                        continue;
                    };
                    plan.imports.push(ImportDirective {
                        abstracted_id: abstracted.abstracted_id.clone(),
                        resource_type: abstracted.resource_type.clone(),
                        target_id: target_id.to_string(),
                        drifted: classification.classification == ClassificationState::Drifted,
                    });
                }
                ClassificationState::New => plan.creates.push(CreateDirective {
                    abstracted_id: abstracted.abstracted_id.clone(),
                    resource_type: abstracted.resource_type.clone(),
                    name: abstracted.name.clone(),
                    defaulted: classification.defaulted,
                }),
                ClassificationState::Orphaned => {}
            }
        }
        plan
    }

    /// Check if nothing needs doing
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.imports.is_empty() && self.creates.is_empty()
    }
}
