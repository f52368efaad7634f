use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

use crate::domain::errors::{Result, WorkflowError};
use super::value_objects::{Address, EmailAddress, ResultCommunicationMode, TelephoneNumber};

// ============================================================================
// External Practitioner & Contact Points
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPoint {
    pub id: Uuid,
    pub practitioner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub preferred_result_communication_mode: ResultCommunicationMode,
    pub information_authority: Option<String>,
    pub addresses: Vec<Address>,
    pub telephone_numbers: Vec<TelephoneNumber>,
    pub email_addresses: Vec<EmailAddress>,
    pub(crate) is_default: bool,
    pub(crate) deactivated: bool,
    pub(crate) merged_into: Option<Uuid>,
}

impl ContactPoint {
    pub fn new(practitioner_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            practitioner_id,
            name: name.into(),
            description: None,
            preferred_result_communication_mode: ResultCommunicationMode::default(),
            information_authority: None,
            addresses: Vec::new(),
            telephone_numbers: Vec::new(),
            email_addresses: Vec::new(),
            is_default: false,
            deactivated: false,
            merged_into: None,
        }
    }

    pub fn in_authority(mut self, authority: impl Into<String>) -> Self {
        self.information_authority = Some(authority.into());
        self
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub fn is_deactivated(&self) -> bool {
        self.deactivated
    }

    pub fn merged_into(&self) -> Option<Uuid> {
        self.merged_into
    }

    pub fn is_merged(&self) -> bool {
        self.merged_into.is_some()
    }

    /// No-op when already deactivated.
    pub fn deactivate(&mut self) {
        self.deactivated = true;
    }

    /// Fails for merged contact points; they stay retired.
    pub fn reactivate(&mut self) -> Result<()> {
        if self.is_merged() {
            return Err(WorkflowError::violation("A merged contact point cannot be re-activated"));
        }
        self.deactivated = false;
        Ok(())
    }

    /// Same details under a new id, owned by `practitioner_id`.
    pub(crate) fn copy_for(&self, practitioner_id: Uuid) -> ContactPoint {
        ContactPoint {
            id: Uuid::new_v4(),
            practitioner_id,
            is_default: false,
            deactivated: false,
            merged_into: None,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalPractitioner {
    pub id: Uuid,
    pub family_name: String,
    pub given_name: String,
    pub license_number: Option<String>,
    pub billing_number: Option<String>,
    pub extended_properties: BTreeMap<String, String>,
    pub(crate) contact_points: Vec<ContactPoint>,
    pub(crate) last_edited_time: Option<DateTime<Utc>>,
    pub(crate) verified: bool,
    pub(crate) deactivated: bool,
    pub(crate) merged_into: Option<Uuid>,
}

impl ExternalPractitioner {
    pub fn new(family_name: impl Into<String>, given_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            family_name: family_name.into(),
            given_name: given_name.into(),
            license_number: None,
            billing_number: None,
            extended_properties: BTreeMap::new(),
            contact_points: Vec::new(),
            last_edited_time: None,
            verified: false,
            deactivated: false,
            merged_into: None,
        }
    }

    pub fn with_numbers(mut self, license_number: impl Into<String>, billing_number: impl Into<String>) -> Self {
        self.license_number = Some(license_number.into());
        self.billing_number = Some(billing_number.into());
        self
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn mark_verified(&mut self) {
        self.verified = true;
    }

    pub fn is_deactivated(&self) -> bool {
        self.deactivated
    }

    pub fn merged_into(&self) -> Option<Uuid> {
        self.merged_into
    }

    pub fn is_merged(&self) -> bool {
        self.merged_into.is_some()
    }

    /// No-op when already deactivated.
    pub fn deactivate(&mut self) {
        self.deactivated = true;
    }

    /// Fails for merged practitioners; they stay retired.
    pub fn reactivate(&mut self) -> Result<()> {
        if self.is_merged() {
            return Err(WorkflowError::violation("A merged practitioner cannot be re-activated"));
        }
        self.deactivated = false;
        Ok(())
    }

    /// Deactivates or reactivates one of this practitioner's contact points.
    pub fn set_contact_point_deactivated(&mut self, id: Uuid, deactivated: bool) -> Result<()> {
        let contact_point = self.contact_point_mut(id)?;
        if deactivated {
            contact_point.deactivate();
            Ok(())
        } else {
            contact_point.reactivate()
        }
    }

    pub fn contact_points(&self) -> &[ContactPoint] {
        &self.contact_points
    }

    pub fn contact_point(&self, id: Uuid) -> Result<&ContactPoint> {
        self.contact_points
            .iter()
            .find(|cp| cp.id == id)
            .ok_or_else(|| WorkflowError::not_found("contact point", id))
    }

    pub(crate) fn contact_point_mut(&mut self, id: Uuid) -> Result<&mut ContactPoint> {
        self.contact_points
            .iter_mut()
            .find(|cp| cp.id == id)
            .ok_or_else(|| WorkflowError::not_found("contact point", id))
    }

    pub fn last_edited_time(&self) -> Option<DateTime<Utc>> {
        self.last_edited_time
    }

    /// Adds a contact point. The first one becomes the default.
    pub fn add_contact_point(&mut self, mut contact_point: ContactPoint) -> Result<Uuid> {
        if contact_point.practitioner_id != self.id {
            return Err(WorkflowError::violation("Contact point belongs to another practitioner"));
        }
        if self.contact_points.is_empty() {
            contact_point.is_default = true;
        }
        let id = contact_point.id;
        self.contact_points.push(contact_point);
        Ok(id)
    }

    pub fn default_contact_point(&self) -> Option<&ContactPoint> {
        self.contact_points.iter().find(|cp| cp.is_default)
    }

    /// Contact point for results from `authority`: an active match, else the default, else any active one.
    pub fn preferred_contact_point(&self, authority: &str) -> Option<&ContactPoint> {
        self.contact_points
            .iter()
            .find(|cp| !cp.deactivated && cp.information_authority.as_deref() == Some(authority))
            .or_else(|| self.default_contact_point())
            .or_else(|| self.contact_points.iter().find(|cp| !cp.deactivated))
    }

    /// Follows merge links from `id` to the contact point that absorbed it.
    pub fn ultimate_merge_destination(&self, id: Uuid) -> Result<Uuid> {
        let mut current = self.contact_point(id)?;
        let mut seen = HashSet::from([current.id]);

        while let Some(next) = current.merged_into {
            if !seen.insert(next) {
                return Err(WorkflowError::violation("Contact point merge chain is circular"));
            }
            current = self.contact_point(next)?;
        }
        Ok(current.id)
    }

    pub(crate) fn mark_edited(&mut self, time: DateTime<Utc>) {
        self.last_edited_time = Some(time);
    }
}
