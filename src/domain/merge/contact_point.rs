use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::{MergeRejection, Result};
use crate::domain::practitioner::{ContactPoint, ExternalPractitioner, ResultCommunicationMode};

// ============================================================================
// Contact Point Merge
// ============================================================================

/// Descriptive fields of the contact point produced by a merge.
#[derive(Debug, Clone, Default)]
pub struct MergedContactPointSpec {
    pub name: String,
    pub description: Option<String>,
    pub preferred_result_communication_mode: ResultCommunicationMode,
    pub information_authority: Option<String>,
}

impl MergedContactPointSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }
}

pub fn can_merge_contact_points(
    source: &ContactPoint,
    destination: &ContactPoint,
) -> std::result::Result<(), MergeRejection> {
    if source.id == destination.id {
        return Err(MergeRejection::SameContactPoint);
    }
    if source.practitioner_id != destination.practitioner_id {
        return Err(MergeRejection::DifferentPractitioners);
    }
    if source.is_merged() || destination.is_merged() {
        return Err(MergeRejection::AlreadyMerged);
    }
    if source.is_deactivated() || destination.is_deactivated() {
        return Err(MergeRejection::Deactivated);
    }
    Ok(())
}

/// Replaces two contact points with a new one holding the union of their
/// addresses, phone numbers and emails. Returns the new contact point's id.
pub fn merge_contact_points(
    practitioner: &mut ExternalPractitioner,
    source_id: Uuid,
    destination_id: Uuid,
    spec: MergedContactPointSpec,
    time: Option<DateTime<Utc>>,
) -> Result<Uuid> {
    let source = practitioner.contact_point(source_id)?;
    let destination = practitioner.contact_point(destination_id)?;
    can_merge_contact_points(source, destination)?;

    let mut merged = ContactPoint::new(practitioner.id, spec.name);
    merged.description = spec.description;
    merged.preferred_result_communication_mode = spec.preferred_result_communication_mode;
    merged.information_authority = spec.information_authority;
    merged.addresses = union(&source.addresses, &destination.addresses);
    merged.telephone_numbers = union(&source.telephone_numbers, &destination.telephone_numbers);
    merged.email_addresses = union(&source.email_addresses, &destination.email_addresses);
    merged.is_default = source.is_default() || destination.is_default();

    let merged_id = merged.id;
    for id in [source_id, destination_id] {
        let retired = practitioner.contact_point_mut(id)?;
        retired.is_default = false;
        retired.deactivated = true;
        retired.merged_into = Some(merged_id);
    }
    practitioner.contact_points.push(merged);
    practitioner.mark_edited(time.unwrap_or_else(Utc::now));

    tracing::info!(
        practitioner_id = %practitioner.id,
        source_id = %source_id,
        destination_id = %destination_id,
        merged_id = %merged_id,
        "contact points merged"
    );
    Ok(merged_id)
}

fn union<T: Clone + PartialEq>(first: &[T], second: &[T]) -> Vec<T> {
    let mut all = first.to_vec();
    for item in second {
        if !all.contains(item) {
            all.push(item.clone());
        }
    }
    all
}
