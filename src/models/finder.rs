//! Request/response shapes for the external search and enrichment providers.

use serde::{Deserialize, Serialize};

use super::{Lead, LeadPatch};

/// A page request to the lead search provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    /// Niche / business category searched for.
    pub query: String,
    pub location: String,
    #[serde(default)]
    pub page: u32,
    /// Dedup keys already in the caller's pipeline.
    #[serde(default)]
    pub known_place_ids: Vec<String>,
}

/// One page of search results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub leads: Vec<Lead>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl From<&Lead> for EnrichmentRequest {
    fn from(lead: &Lead) -> Self {
        Self {
            name: lead.name.clone(),
            location: lead.city.clone().or_else(|| lead.address.clone()),
            website: lead.website.clone(),
        }
    }
}

/// Progress reported by the enrichment provider before it resolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentProgress {
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Fields found by the enrichment provider. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrichment {
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub linkedin_url: Option<String>,
    #[serde(default)]
    pub instagram_url: Option<String>,
    #[serde(default)]
    pub registry_id: Option<String>,
}

impl Enrichment {
    pub fn is_empty(&self) -> bool {
        self == &Enrichment::default()
    }

    pub fn into_patch(self) -> LeadPatch {
        LeadPatch {
            contact_name: self.contact_name,
            email: self.email,
            phone: self.phone,
            website: self.website,
            linkedin_url: self.linkedin_url,
            instagram_url: self.instagram_url,
            registry_id: self.registry_id,
            ..Default::default()
        }
    }
}
