//! Lead model: the prospect record that moves through the pipeline board.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Owner;

/// Identity of a lead.
///
/// Leads created locally carry a temporary identity until the store assigns
/// the real one. On the wire both render as plain strings; temporary ids use
/// the `temp-` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum LeadId {
    Stored(String),
    Temporary(Uuid),
}

impl LeadId {
    pub const TEMP_PREFIX: &'static str = "temp-";

    /// Generate a fresh temporary identity.
    pub fn temporary() -> Self {
        LeadId::Temporary(Uuid::new_v4())
    }

    pub fn stored(id: impl Into<String>) -> Self {
        LeadId::Stored(id.into())
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, LeadId::Temporary(_))
    }

    /// The store-assigned identifier, if this identity has been persisted.
    pub fn as_stored(&self) -> Option<&str> {
        match self {
            LeadId::Stored(id) => Some(id),
            LeadId::Temporary(_) => None,
        }
    }
}

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeadId::Stored(id) => f.write_str(id),
            LeadId::Temporary(uuid) => write!(f, "{}{}", Self::TEMP_PREFIX, uuid),
        }
    }
}

impl From<String> for LeadId {
    fn from(value: String) -> Self {
        match value
            .strip_prefix(Self::TEMP_PREFIX)
            .and_then(|rest| Uuid::parse_str(rest).ok())
        {
            Some(uuid) => LeadId::Temporary(uuid),
            None => LeadId::Stored(value),
        }
    }
}

impl From<&str> for LeadId {
    fn from(value: &str) -> Self {
        LeadId::from(value.to_string())
    }
}

impl From<LeadId> for String {
    fn from(id: LeadId) -> Self {
        id.to_string()
    }
}

/// Pipeline stage. `Closed` is the only terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Proposal,
    Negotiation,
    Closed,
}

impl LeadStatus {
    /// Board column order.
    pub const ALL: [LeadStatus; 6] = [
        LeadStatus::New,
        LeadStatus::Contacted,
        LeadStatus::Qualified,
        LeadStatus::Proposal,
        LeadStatus::Negotiation,
        LeadStatus::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "NEW",
            LeadStatus::Contacted => "CONTACTED",
            LeadStatus::Qualified => "QUALIFIED",
            LeadStatus::Proposal => "PROPOSAL",
            LeadStatus::Negotiation => "NEGOTIATION",
            LeadStatus::Closed => "CLOSED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LeadStatus::Closed)
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LeadStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown lead status: {}", s))
    }
}

/// Where a lead came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LeadSource {
    #[default]
    Manual,
    AiFinder,
    Import,
}

impl LeadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadSource::Manual => "manual",
            LeadSource::AiFinder => "ai_finder",
            LeadSource::Import => "import",
        }
    }
}

impl FromStr for LeadSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(LeadSource::Manual),
            "ai_finder" => Ok(LeadSource::AiFinder),
            "import" => Ok(LeadSource::Import),
            other => Err(format!("unknown lead source: {}", other)),
        }
    }
}

/// A prospect record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: LeadId,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub source: LeadSource,
    pub status: LeadStatus,
    #[serde(default)]
    pub order_index: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkedin_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instagram_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_id: Option<String>,
    pub added_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Transient: set on finder candidates already present in the pipeline.
    #[serde(default)]
    pub is_saved: bool,
}

impl Lead {
    /// Build a lead from a creation request for the given owner.
    pub fn from_request(request: &NewLead, owner: &Owner, id: LeadId, now: DateTime<Utc>) -> Self {
        let status = request.status.unwrap_or(LeadStatus::New);
        Self {
            id,
            user_id: owner.user_id.clone(),
            organization_id: owner.organization_id.clone(),
            name: request.name.trim().to_string(),
            category: request.category.clone(),
            source: request.source,
            status,
            order_index: 0,
            tags: dedup_tags(&request.tags),
            place_id: request.place_id.clone(),
            address: request.address.clone(),
            city: request.city.clone(),
            phone: request.phone.clone(),
            email: request.email.clone(),
            website: request.website.clone(),
            rating: request.rating,
            notes: request.notes.clone(),
            contact_name: None,
            linkedin_url: None,
            instagram_url: None,
            registry_id: None,
            added_at: now,
            closed_at: status.is_terminal().then_some(now),
            updated_at: now,
            is_saved: false,
        }
    }

    /// Move the lead to `to`, maintaining `closed_at`.
    ///
    /// Entering the terminal stage stamps `closed_at`, leaving it clears it.
    /// Moves that stay on one side of the boundary leave it untouched.
    pub fn set_status(&mut self, to: LeadStatus, now: DateTime<Utc>) {
        match (self.status.is_terminal(), to.is_terminal()) {
            (false, true) => self.closed_at = Some(now),
            (true, false) => self.closed_at = None,
            _ => {}
        }
        self.status = to;
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t == name)
    }

    /// Drop `name` from the tag set. Returns whether anything changed.
    pub fn remove_tag(&mut self, name: &str) -> bool {
        let before = self.tags.len();
        self.tags.retain(|t| t != name);
        self.tags.len() != before
    }

    /// Replace `old_name` with `new_name`, collapsing the pair if the lead
    /// already carried both. Returns whether anything changed.
    pub fn rename_tag(&mut self, old_name: &str, new_name: &str) -> bool {
        if old_name == new_name || !self.has_tag(old_name) {
            return false;
        }
        let renamed: Vec<String> = self
            .tags
            .iter()
            .map(|t| {
                if t == old_name {
                    new_name.to_string()
                } else {
                    t.clone()
                }
            })
            .collect();
        self.tags = dedup_tags(&renamed);
        true
    }

    /// Overwrite persisted fields with `incoming`, keeping local-only state.
    pub fn merge_from(&mut self, incoming: &Lead) {
        let is_saved = self.is_saved;
        *self = incoming.clone();
        self.is_saved = is_saved;
    }

    /// Whether `owner` can see this lead.
    pub fn visible_to(&self, owner: &Owner) -> bool {
        self.user_id == owner.user_id
            || match (&self.organization_id, &owner.organization_id) {
                (Some(mine), Some(theirs)) => mine == theirs,
                _ => false,
            }
    }
}

/// Remove blank and repeated tag names, keeping first occurrence order.
pub fn dedup_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

/// Request body for creating a new lead.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLead {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub source: LeadSource,
    #[serde(default)]
    pub status: Option<LeadStatus>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub place_id: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl From<&Lead> for NewLead {
    /// Promote a finder candidate (or any lead) into a creation request.
    fn from(lead: &Lead) -> Self {
        Self {
            name: lead.name.clone(),
            category: lead.category.clone(),
            source: lead.source,
            status: None,
            tags: lead.tags.clone(),
            place_id: lead.place_id.clone(),
            address: lead.address.clone(),
            city: lead.city.clone(),
            phone: lead.phone.clone(),
            email: lead.email.clone(),
            website: lead.website.clone(),
            rating: lead.rating,
            notes: lead.notes.clone(),
        }
    }
}

/// Merge-patch for an existing lead. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub status: Option<LeadStatus>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub linkedin_url: Option<String>,
    #[serde(default)]
    pub instagram_url: Option<String>,
    #[serde(default)]
    pub registry_id: Option<String>,
}

impl LeadPatch {
    pub fn status(status: LeadStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn tags(tags: Vec<String>) -> Self {
        Self {
            tags: Some(tags),
            ..Default::default()
        }
    }

    /// Apply the patch in place. Status changes go through [`Lead::set_status`].
    pub fn apply_to(&self, lead: &mut Lead, now: DateTime<Utc>) {
        if let Some(name) = &self.name {
            lead.name = name.trim().to_string();
        }
        if let Some(status) = self.status {
            lead.set_status(status, now);
        }
        if let Some(tags) = &self.tags {
            lead.tags = dedup_tags(tags);
        }
        patch_field(&mut lead.category, &self.category);
        patch_field(&mut lead.address, &self.address);
        patch_field(&mut lead.city, &self.city);
        patch_field(&mut lead.phone, &self.phone);
        patch_field(&mut lead.email, &self.email);
        patch_field(&mut lead.website, &self.website);
        patch_field(&mut lead.notes, &self.notes);
        patch_field(&mut lead.contact_name, &self.contact_name);
        patch_field(&mut lead.linkedin_url, &self.linkedin_url);
        patch_field(&mut lead.instagram_url, &self.instagram_url);
        patch_field(&mut lead.registry_id, &self.registry_id);
        if self.rating.is_some() {
            lead.rating = self.rating;
        }
        lead.updated_at = now;
    }
}

fn patch_field(target: &mut Option<String>, value: &Option<String>) {
    if let Some(v) = value {
        *target = Some(v.clone());
    }
}

/// Request body for the batched insert-or-update endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpsertRequest {
    pub leads: Vec<Lead>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn owner() -> Owner {
        Owner::new("user-1", None)
    }

    fn lead(status: LeadStatus) -> Lead {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let request = NewLead {
            name: "Acme".to_string(),
            status: Some(status),
            ..Default::default()
        };
        Lead::from_request(&request, &owner(), LeadId::stored("l1"), now)
    }

    #[test]
    fn test_lead_id_round_trips_through_string() {
        let temp = LeadId::temporary();
        let rendered = temp.to_string();
        assert!(rendered.starts_with(LeadId::TEMP_PREFIX));
        assert_eq!(LeadId::from(rendered), temp);

        let stored = LeadId::from("abc-123");
        assert_eq!(stored, LeadId::stored("abc-123"));
        assert!(!stored.is_temporary());
    }

    #[test]
    fn test_temp_prefix_without_uuid_is_stored() {
        let id = LeadId::from("temp-not-a-uuid");
        assert_eq!(id.as_stored(), Some("temp-not-a-uuid"));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("CLOSED".parse::<LeadStatus>(), Ok(LeadStatus::Closed));
        assert!("closed".parse::<LeadStatus>().is_err());
    }

    #[test]
    fn test_entering_closed_sets_closed_at() {
        let mut lead = lead(LeadStatus::Qualified);
        let now = Utc::now();
        lead.set_status(LeadStatus::Closed, now);
        assert_eq!(lead.closed_at, Some(now));
    }

    #[test]
    fn test_leaving_closed_clears_closed_at() {
        let mut lead = lead(LeadStatus::Closed);
        assert!(lead.closed_at.is_some());
        lead.set_status(LeadStatus::Contacted, Utc::now());
        assert!(lead.closed_at.is_none());
    }

    #[test]
    fn test_closed_to_closed_keeps_timestamp() {
        let mut lead = lead(LeadStatus::Closed);
        let original = lead.closed_at;
        lead.set_status(LeadStatus::Closed, Utc::now());
        assert_eq!(lead.closed_at, original);
    }

    #[test]
    fn test_patch_dedups_tags_and_keeps_untouched_fields() {
        let mut lead = lead(LeadStatus::New);
        lead.phone = Some("123".to_string());
        let patch = LeadPatch {
            tags: Some(vec!["VIP".into(), " VIP ".into(), "".into(), "Hot".into()]),
            ..Default::default()
        };
        patch.apply_to(&mut lead, Utc::now());
        assert_eq!(lead.tags, vec!["VIP".to_string(), "Hot".to_string()]);
        assert_eq!(lead.phone.as_deref(), Some("123"));
    }

    #[test]
    fn test_rename_tag_collapses_duplicates() {
        let mut lead = lead(LeadStatus::New);
        lead.tags = vec!["A".into(), "B".into(), "C".into()];
        assert!(lead.rename_tag("A", "B"));
        assert_eq!(lead.tags, vec!["B".to_string(), "C".to_string()]);
        assert!(!lead.rename_tag("missing", "X"));
        assert!(lead.remove_tag("C"));
        assert!(!lead.remove_tag("C"));
        assert_eq!(lead.tags, vec!["B".to_string()]);
    }

    #[test]
    fn test_merge_from_keeps_transient_flag() {
        let mut local = lead(LeadStatus::New);
        local.is_saved = true;
        let mut remote = local.clone();
        remote.is_saved = false;
        remote.name = "Acme GmbH".to_string();
        local.merge_from(&remote);
        assert_eq!(local.name, "Acme GmbH");
        assert!(local.is_saved);
    }

    #[test]
    fn test_visibility_by_organization() {
        let mut lead = lead(LeadStatus::New);
        lead.organization_id = Some("org-1".to_string());
        assert!(lead.visible_to(&Owner::new("someone-else", Some("org-1"))));
        assert!(!lead.visible_to(&Owner::new("someone-else", Some("org-2"))));
        assert!(!lead.visible_to(&Owner::new("someone-else", None)));
    }
}
