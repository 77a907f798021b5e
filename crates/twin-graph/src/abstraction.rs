//! Record-level abstraction
//!
//! Turns a crawled [`ResourceRecord`] into its [`AbstractedResource`].

use crate::model::{AbstractedResource, ResourceRecord};
use crate::resource_id::subscription_of;
use twin_identity::{AbstractionError, IdentityAbstractor, TenantSeed};

/// Abstract one record with a resolved tenant seed
///
/// The subscription is taken from the record, or parsed from `real_id` when
/// the crawler did not fill it in.
///
/// # Errors
/// - `AbstractionError::EmptyIdentifier` for a blank `real_id`
/// - `AbstractionError::EmptyType` for a blank `resource_type`
pub fn abstract_record(
    abstractor: &IdentityAbstractor,
    seed: &TenantSeed,
    record: &ResourceRecord,
) -> Result<AbstractedResource, AbstractionError> {
    if record.real_id.trim().is_empty() {
        return Err(AbstractionError::EmptyIdentifier);
    }
    if record.resource_type.trim().is_empty() {
        return Err(AbstractionError::EmptyType(record.real_id.clone()));
    }

    let abstracted_id = abstractor.abstract_with_seed(seed, &record.real_id, &record.resource_type)?;

    let subscription = record
        .subscription_id
        .clone()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| subscription_of(&record.real_id));

    let properties =
        abstractor.abstract_properties(seed, &record.properties, subscription.as_deref());

    Ok(AbstractedResource {
        abstracted_id,
        resource_type: record.resource_type.clone(),
        name: record.name.clone(),
        location: record.location.clone(),
        tags: record.tags.clone(),
        properties,
        resource_group: record.resource_group.clone(),
        subscription_id: subscription
            .map(|_| abstractor.config().subscription_placeholder.clone()),
        original_id: None,
    })
}
