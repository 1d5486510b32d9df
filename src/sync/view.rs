//! Filtered board projection.

use serde::{Deserialize, Serialize};

use super::ordering;
use crate::models::{Lead, LeadSource, LeadStatus, TagDefinition, TagView};

/// Board filter. Dimensions combine with AND; values inside one dimension
/// combine with OR; an empty dimension matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewFilter {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub sources: Vec<LeadSource>,
    #[serde(default)]
    pub locations: Vec<String>,
    /// User ids.
    #[serde(default)]
    pub owners: Vec<String>,
    /// Free text matched against name, category and notes.
    #[serde(default)]
    pub query: Option<String>,
}

impl ViewFilter {
    pub fn is_empty(&self) -> bool {
        self == &ViewFilter::default()
    }

    pub fn matches(&self, lead: &Lead) -> bool {
        self.matches_tags(lead)
            && self.matches_categories(lead)
            && (self.sources.is_empty() || self.sources.contains(&lead.source))
            && self.matches_locations(lead)
            && (self.owners.is_empty() || self.owners.iter().any(|o| o == &lead.user_id))
            && self.matches_query(lead)
    }

    fn matches_tags(&self, lead: &Lead) -> bool {
        self.tags.is_empty() || self.tags.iter().any(|t| lead.has_tag(t))
    }

    fn matches_categories(&self, lead: &Lead) -> bool {
        if self.categories.is_empty() {
            return true;
        }
        let Some(category) = &lead.category else {
            return false;
        };
        self.categories.iter().any(|c| c.eq_ignore_ascii_case(category))
    }

    fn matches_locations(&self, lead: &Lead) -> bool {
        if self.locations.is_empty() {
            return true;
        }
        let address = lead.address.as_deref().unwrap_or("").to_lowercase();
        self.locations.iter().any(|location| {
            lead.city
                .as_deref()
                .is_some_and(|city| city.eq_ignore_ascii_case(location))
                || (!location.is_empty() && address.contains(&location.to_lowercase()))
        })
    }

    fn matches_query(&self, lead: &Lead) -> bool {
        let Some(query) = self.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) else {
            return true;
        };
        let query = query.to_lowercase();
        [Some(lead.name.as_str()), lead.category.as_deref(), lead.notes.as_deref()]
            .into_iter()
            .flatten()
            .any(|text| text.to_lowercase().contains(&query))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardColumn {
    pub status: LeadStatus,
    pub leads: Vec<Lead>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardView {
    pub columns: Vec<BoardColumn>,
    pub tags: Vec<TagView>,
    /// Leads matching the filter, across all columns.
    pub total: usize,
}

impl BoardView {
    pub fn column(&self, status: LeadStatus) -> Option<&BoardColumn> {
        self.columns.iter().find(|c| c.status == status)
    }
}

/// Leads matching `filter`, in collection order.
pub fn filter_leads(leads: &[Lead], filter: &ViewFilter) -> Vec<Lead> {
    leads.iter().filter(|l| filter.matches(l)).cloned().collect()
}

/// Project the filtered leads into one column per stage, each sorted in
/// canonical rank order.
pub fn project(leads: &[Lead], taxonomy: &[TagDefinition], filter: &ViewFilter) -> BoardView {
    let visible = filter_leads(leads, filter);
    let columns = LeadStatus::ALL
        .into_iter()
        .map(|status| BoardColumn {
            status,
            leads: ordering::partition(&visible, status),
        })
        .collect();

    BoardView {
        columns,
        tags: taxonomy.iter().map(TagView::from).collect(),
        total: visible.len(),
    }
}
