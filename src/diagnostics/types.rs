//! Diagnostics Types
//!
//! Findings, severities and fix targets produced by the diagnostics engine.

use crate::shared::entity::{Address, EntityType, Name, Place, Record, Region, Service, Shift, Trip};
use serde::{Deserialize, Serialize};

/// How the surviving record of a duplicate group is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalRule {
    /// Lowest local id
    #[default]
    EarliestId,
    /// Most non-empty fields, lowest id on ties
    MostComplete,
}

impl CanonicalRule {
    /// Pick the canonical record from members sorted by id
    pub fn choose<'a, T: Record>(self, members: &'a [T]) -> Option<&'a T> {
        match self {
            CanonicalRule::EarliestId => members.iter().min_by_key(|m| m.id()),
            CanonicalRule::MostComplete => members
                .iter()
                .min_by_key(|m| (std::cmp::Reverse(m.completeness()), m.id())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// Records sharing one normalized key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "T: Record")]
pub struct DuplicateGroup<T: Record> {
    pub key: String,
    /// Ascending by id
    pub items: Vec<T>,
}

impl<T: Record> DuplicateGroup<T> {
    pub fn ids(&self) -> Vec<u64> {
        self.items.iter().map(|i| i.id()).collect()
    }

    /// Members carry the same payload, so merging loses nothing
    pub fn is_identical(&self) -> bool {
        match self.items.split_first() {
            Some((first, rest)) => rest.iter().all(|i| first.same_payload(i)),
            None => true,
        }
    }

    pub fn target(&self) -> FixTarget {
        FixTarget {
            entity: T::ENTITY,
            key: self.key.clone(),
            member_ids: self.ids(),
        }
    }
}

/// Duplicate groups, typed per entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "groups", rename_all = "snake_case")]
pub enum DuplicateFindings {
    Trip(Vec<DuplicateGroup<Trip>>),
    Shift(Vec<DuplicateGroup<Shift>>),
    Address(Vec<DuplicateGroup<Address>>),
    Place(Vec<DuplicateGroup<Place>>),
    Name(Vec<DuplicateGroup<Name>>),
    Service(Vec<DuplicateGroup<Service>>),
    Region(Vec<DuplicateGroup<Region>>),
}

macro_rules! each_findings {
    ($findings:expr, $groups:ident => $body:expr) => {
        match $findings {
            DuplicateFindings::Trip($groups) => $body,
            DuplicateFindings::Shift($groups) => $body,
            DuplicateFindings::Address($groups) => $body,
            DuplicateFindings::Place($groups) => $body,
            DuplicateFindings::Name($groups) => $body,
            DuplicateFindings::Service($groups) => $body,
            DuplicateFindings::Region($groups) => $body,
        }
    };
}

impl DuplicateFindings {
    pub fn entity_type(&self) -> EntityType {
        match self {
            DuplicateFindings::Trip(_) => EntityType::Trip,
            DuplicateFindings::Shift(_) => EntityType::Shift,
            DuplicateFindings::Address(_) => EntityType::Address,
            DuplicateFindings::Place(_) => EntityType::Place,
            DuplicateFindings::Name(_) => EntityType::Name,
            DuplicateFindings::Service(_) => EntityType::Service,
            DuplicateFindings::Region(_) => EntityType::Region,
        }
    }

    pub fn group_count(&self) -> usize {
        each_findings!(self, groups => groups.len())
    }

    /// Records involved across all groups
    pub fn record_count(&self) -> usize {
        each_findings!(self, groups => groups.iter().map(|g| g.items.len()).sum())
    }

    pub fn keys(&self) -> Vec<String> {
        each_findings!(self, groups => groups.iter().map(|g| g.key.clone()).collect())
    }

    pub fn targets(&self) -> Vec<FixTarget> {
        each_findings!(self, groups => groups.iter().map(|g| g.target()).collect())
    }

    /// Every group has identical members
    pub fn all_identical(&self) -> bool {
        each_findings!(self, groups => groups.iter().all(|g| g.is_identical()))
    }
}

/// Which check produced a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Duplicates,
    OrphanedTrips,
    ShiftsWithoutDuration,
    TripsWithoutDuration,
    EmptyShifts,
}

/// Typed payload of a diagnostic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum Findings {
    Duplicates(DuplicateFindings),
    OrphanedTrips(Vec<Trip>),
    ShiftsWithoutDuration(Vec<Shift>),
    TripsWithoutDuration(Vec<Trip>),
    EmptyShifts(Vec<Shift>),
}

impl Findings {
    pub fn kind(&self) -> CheckKind {
        match self {
            Findings::Duplicates(_) => CheckKind::Duplicates,
            Findings::OrphanedTrips(_) => CheckKind::OrphanedTrips,
            Findings::ShiftsWithoutDuration(_) => CheckKind::ShiftsWithoutDuration,
            Findings::TripsWithoutDuration(_) => CheckKind::TripsWithoutDuration,
            Findings::EmptyShifts(_) => CheckKind::EmptyShifts,
        }
    }
}

/// One entry of the diagnostics report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticItem {
    pub name: String,
    /// Groups for duplicate scans, records for the other checks
    pub count: usize,
    pub severity: Severity,
    pub description: String,
    pub item_type: EntityType,
    pub fixable: bool,
    pub bulk_fixable: bool,
    pub findings: Findings,
}

impl DiagnosticItem {
    pub fn duplicates(&self) -> Option<&DuplicateFindings> {
        match &self.findings {
            Findings::Duplicates(findings) => Some(findings),
            _ => None,
        }
    }

    /// Fix targets of a duplicate scan; empty for other checks
    pub fn targets(&self) -> Vec<FixTarget> {
        self.duplicates().map(|d| d.targets()).unwrap_or_default()
    }
}

/// A duplicate group as it was seen by a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixTarget {
    pub entity: EntityType,
    pub key: String,
    pub member_ids: Vec<u64>,
}

/// What a bulk fix changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixReport {
    pub entity: EntityType,
    pub key: String,
    pub canonical_id: u64,
    /// Non-canonical members removed (hard or soft)
    pub removed: Vec<u64>,
    /// Dependent trips and shifts pointed at the canonical record
    pub reassigned: usize,
}
