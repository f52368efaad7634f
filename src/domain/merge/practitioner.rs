use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

use crate::domain::errors::{MergeRejection, Result, WorkflowError};
use crate::domain::practitioner::{ContactPoint, ExternalPractitioner};

// ============================================================================
// External Practitioner Merge
// ============================================================================
//
// Two duplicate practitioners are retired into a brand new one. Every
// active contact point is copied across unless it is replaced by another,
// and each retired contact point records where it went.
//
// ============================================================================

/// Fields of the practitioner produced by a merge, plus the contact point choices.
#[derive(Debug, Clone, Default)]
pub struct MergedPractitionerSpec {
    pub family_name: String,
    pub given_name: String,
    pub license_number: Option<String>,
    pub billing_number: Option<String>,
    pub extended_properties: BTreeMap<String, String>,
    /// Contact point whose copy becomes the default. `None` leaves no default.
    pub default_contact_point: Option<Uuid>,
    /// Contact points whose copies start deactivated.
    pub deactivated_contact_points: Vec<Uuid>,
    /// Contact points dropped in favour of another one (key replaced by value).
    pub contact_point_replacements: HashMap<Uuid, Uuid>,
}

impl MergedPractitionerSpec {
    /// Takes every field from `primary`, keeping its default contact point.
    pub fn from_practitioner(primary: &ExternalPractitioner) -> Self {
        Self {
            family_name: primary.family_name.clone(),
            given_name: primary.given_name.clone(),
            license_number: primary.license_number.clone(),
            billing_number: primary.billing_number.clone(),
            extended_properties: primary.extended_properties.clone(),
            default_contact_point: primary.default_contact_point().map(|cp| cp.id),
            ..Self::default()
        }
    }

    pub fn with_default(mut self, contact_point: Option<Uuid>) -> Self {
        self.default_contact_point = contact_point;
        self
    }

    pub fn deactivating(mut self, contact_point: Uuid) -> Self {
        self.deactivated_contact_points.push(contact_point);
        self
    }

    pub fn replacing(mut self, replaced: Uuid, replacement: Uuid) -> Self {
        self.contact_point_replacements.insert(replaced, replacement);
        self
    }
}

pub fn can_merge_practitioners(
    source: &ExternalPractitioner,
    destination: &ExternalPractitioner,
) -> std::result::Result<(), MergeRejection> {
    if source.id == destination.id {
        return Err(MergeRejection::SamePractitioner);
    }
    if source.is_merged() || destination.is_merged() {
        return Err(MergeRejection::PractitionerAlreadyMerged);
    }
    if source.is_deactivated() || destination.is_deactivated() {
        return Err(MergeRejection::PractitionerDeactivated);
    }
    Ok(())
}

/// Merges `source` and `destination` into a new practitioner, which is returned.
/// Both inputs end up merged into it, deactivated and unverified.
pub fn merge_practitioners(
    source: &mut ExternalPractitioner,
    destination: &mut ExternalPractitioner,
    spec: MergedPractitionerSpec,
    time: Option<DateTime<Utc>>,
) -> Result<ExternalPractitioner> {
    can_merge_practitioners(source, destination)?;
    check_contact_point_choices(source, destination, &spec)?;
    let time = time.unwrap_or_else(Utc::now);

    let mut result = ExternalPractitioner::new(spec.family_name, spec.given_name);
    result.license_number = spec.license_number;
    result.billing_number = spec.billing_number;
    result.extended_properties = spec.extended_properties;

    // merged points were already folded into another point and are not carried over
    let mut copies: HashMap<Uuid, Uuid> = HashMap::new();
    for original in active_points(source, destination) {
        if spec.contact_point_replacements.contains_key(&original.id) {
            continue;
        }
        let mut copy = original.copy_for(result.id);
        copy.is_default = spec.default_contact_point == Some(original.id);
        copy.deactivated = original.is_deactivated() || spec.deactivated_contact_points.contains(&original.id);
        copies.insert(original.id, copy.id);
        result.contact_points.push(copy);
    }

    let mut destinations = copies.clone();
    for (replaced, replacement) in &spec.contact_point_replacements {
        let copy = copies
            .get(replacement)
            .copied()
            .ok_or_else(|| WorkflowError::violation("A replacement contact point must itself be carried over"))?;
        destinations.insert(*replaced, copy);
    }

    for practitioner in [&mut *source, &mut *destination] {
        for contact_point in practitioner.contact_points.iter_mut().filter(|cp| !cp.is_merged()) {
            contact_point.merged_into = destinations.get(&contact_point.id).copied();
            contact_point.is_default = false;
            contact_point.deactivated = true;
        }
        practitioner.merged_into = Some(result.id);
        practitioner.deactivated = true;
        practitioner.verified = false;
        practitioner.mark_edited(time);
    }
    result.mark_edited(time);

    tracing::info!(
        source_id = %source.id,
        destination_id = %destination.id,
        merged_id = %result.id,
        contact_points = result.contact_points.len(),
        "external practitioners merged"
    );
    Ok(result)
}

fn active_points<'a>(
    source: &'a ExternalPractitioner,
    destination: &'a ExternalPractitioner,
) -> impl Iterator<Item = &'a ContactPoint> {
    source
        .contact_points()
        .iter()
        .chain(destination.contact_points())
        .filter(|cp| !cp.is_merged())
}

fn check_contact_point_choices(
    source: &ExternalPractitioner,
    destination: &ExternalPractitioner,
    spec: &MergedPractitionerSpec,
) -> Result<()> {
    let find = |id: Uuid| {
        source
            .contact_point(id)
            .or_else(|_| destination.contact_point(id))
    };

    if let Some(id) = spec.default_contact_point {
        if find(id)?.is_merged() {
            return Err(WorkflowError::violation("A merged contact point cannot be the default"));
        }
        if spec.contact_point_replacements.contains_key(&id) {
            return Err(WorkflowError::violation("A replaced contact point cannot be the default"));
        }
    }
    for id in &spec.deactivated_contact_points {
        find(*id)?;
    }
    for (replaced, replacement) in &spec.contact_point_replacements {
        find(*replaced)?;
        if find(*replacement)?.is_merged() {
            return Err(WorkflowError::violation("A merged contact point cannot replace another"));
        }
    }
    Ok(())
}

// ============================================================================
// Merge Chains
// ============================================================================

/// Follows practitioner merge links from `id` through `practitioners`.
pub fn ultimate_practitioner(practitioners: &[ExternalPractitioner], id: Uuid) -> Result<Uuid> {
    let by_id: HashMap<Uuid, Option<Uuid>> = practitioners.iter().map(|p| (p.id, p.merged_into())).collect();
    follow(&by_id, id, "external practitioner")
}

/// Follows contact point merge links from `id` across all `practitioners`.
pub fn ultimate_contact_point(practitioners: &[ExternalPractitioner], id: Uuid) -> Result<Uuid> {
    let by_id: HashMap<Uuid, Option<Uuid>> = practitioners
        .iter()
        .flat_map(|p| p.contact_points())
        .map(|cp| (cp.id, cp.merged_into()))
        .collect();
    follow(&by_id, id, "contact point")
}

fn follow(links: &HashMap<Uuid, Option<Uuid>>, id: Uuid, entity: &'static str) -> Result<Uuid> {
    let mut current = id;
    let mut seen = HashSet::from([id]);

    loop {
        match links.get(&current) {
            None => return Err(WorkflowError::not_found(entity, current)),
            Some(None) => return Ok(current),
            Some(Some(next)) => {
                if !seen.insert(*next) {
                    return Err(WorkflowError::violation(format!("{entity} merge chain is circular")));
                }
                current = *next;
            }
        }
    }
}
