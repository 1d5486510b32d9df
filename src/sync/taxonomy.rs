//! Tag taxonomy reconciliation.
//!
//! Canonical tag rows and the tag names carried on leads are allowed to
//! drift. The board shows the union: every canonical row, plus a virtual
//! definition for any name that only exists on leads.

use std::collections::HashSet;

use crate::errors::AppError;
use crate::models::{Lead, LeadId, TagDefinition, TagRow};

/// Merge canonical rows with names used on leads, one definition per name,
/// sorted case-insensitively (exact name breaks ties).
pub fn reconcile(canonical: &[TagRow], leads: &[Lead]) -> Vec<TagDefinition> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut defs = Vec::new();

    for row in canonical {
        if seen.insert(row.name.as_str()) {
            defs.push(TagDefinition::Canonical(row.clone()));
        }
    }
    for lead in leads {
        for name in &lead.tags {
            if seen.insert(name.as_str()) {
                defs.push(TagDefinition::Virtual { name: name.clone() });
            }
        }
    }

    defs.sort_by(|a, b| {
        a.name()
            .to_lowercase()
            .cmp(&b.name().to_lowercase())
            .then_with(|| a.name().cmp(b.name()))
    });
    defs
}

pub fn find_by_name<'a>(canonical: &'a [TagRow], name: &str) -> Option<&'a TagRow> {
    canonical.iter().find(|t| t.name == name)
}

/// Trim a user-supplied tag name, rejecting blanks.
pub fn normalize_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Tag name cannot be empty".to_string()));
    }
    Ok(name.to_string())
}

/// Remove `name` from every lead. Returns the ids of leads that changed.
pub fn strip_tag(leads: &mut [Lead], name: &str) -> Vec<LeadId> {
    leads
        .iter_mut()
        .filter_map(|lead| lead.remove_tag(name).then(|| lead.id.clone()))
        .collect()
}

/// Rename `old_name` to `new_name` on every lead. Returns the ids of leads
/// that changed.
pub fn rename_tag(leads: &mut [Lead], old_name: &str, new_name: &str) -> Vec<LeadId> {
    leads
        .iter_mut()
        .filter_map(|lead| lead.rename_tag(old_name, new_name).then(|| lead.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewLead, Owner, DEFAULT_TAG_COLOR};
    use chrono::Utc;

    fn row(name: &str) -> TagRow {
        TagRow {
            id: format!("tag-{}", name),
            name: name.to_string(),
            color: "#ef4444".to_string(),
            scope: "u1".to_string(),
            created_by: "u1".to_string(),
            created_at: Utc::now(),
        }
    }

    fn tagged(id: &str, tags: &[&str]) -> Lead {
        let request = NewLead {
            name: id.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        };
        Lead::from_request(&request, &Owner::new("u1", None), LeadId::stored(id), Utc::now())
    }

    #[test]
    fn test_reconcile_unions_and_sorts() {
        let canonical = vec![row("vip"), row("Hot")];
        let leads = vec![tagged("a", &["VIP", "Hot"]), tagged("b", &["cold", "vip"])];

        let defs = reconcile(&canonical, &leads);
        let names: Vec<&str> = defs.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["cold", "Hot", "VIP", "vip"]);

        assert!(!defs[1].is_virtual());
        assert!(!defs[3].is_virtual());
        assert!(defs[0].is_virtual());
        assert_eq!(defs[0].color(), DEFAULT_TAG_COLOR);
        assert_eq!(defs[0].id(), "virtual-cold");
    }

    #[test]
    fn test_strip_and_rename_report_changed_leads() {
        let mut leads = vec![
            tagged("a", &["A", "B"]),
            tagged("b", &["B"]),
            tagged("c", &["A"]),
        ];

        let renamed = rename_tag(&mut leads, "A", "B");
        assert_eq!(renamed, vec![LeadId::stored("a"), LeadId::stored("c")]);
        assert!(leads.iter().all(|l| !l.has_tag("A")));
        assert_eq!(leads[0].tags, vec!["B".to_string()]);

        let stripped = strip_tag(&mut leads, "B");
        assert_eq!(stripped.len(), 3);
        assert!(leads.iter().all(|l| l.tags.is_empty()));
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  VIP ").unwrap(), "VIP");
        assert!(matches!(normalize_name("   "), Err(AppError::Validation(_))));
    }
}
