//! Duplicate keys
//!
//! Two records are duplicates when their normalized keys match: whitespace
//! is collapsed and case is ignored. The store's own identity key stays
//! exact, so `"Uber"` and `"uber "` can coexist there and still be flagged here.

use crate::shared::entity::{Address, Name, Place, Region, Service, Shift, Trip};

/// Trim, collapse inner whitespace and lowercase
pub fn normalize_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Normalized `date|service|number`
pub fn normalize_shift_key(date: &str, service: &str, number: u32) -> String {
    format!("{}|{}|{}", normalize_text(date), normalize_text(service), number)
}

/// Key under which records are grouped as duplicates
pub trait DedupKey {
    fn dedup_key(&self) -> String;
}

impl DedupKey for Trip {
    fn dedup_key(&self) -> String {
        normalize_shift_key(&self.date, &self.service, self.number)
    }
}

impl DedupKey for Shift {
    fn dedup_key(&self) -> String {
        normalize_shift_key(&self.date, &self.service, self.number)
    }
}

macro_rules! label_key {
    ($($ty:ty),*) => {
        $(
            impl DedupKey for $ty {
                fn dedup_key(&self) -> String {
                    normalize_text(self.label())
                }
            }
        )*
    };
}

label_key!(Address, Place, Name, Service, Region);
