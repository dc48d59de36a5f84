//! Domain Entities
//!
//! Trip/shift logging records and the reference entities they point at.
//! Every entity implements [`ActionRecord`] and [`Record`], which is what the
//! local store, the sync orchestrator and the diagnostics engine work with.
//!
//! References between entities are by value: a trip names its place, service
//! and addresses by text, the same way the remote spreadsheet does.

use crate::shared::action::{Action, ActionRecord};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Entity table discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Trip,
    Shift,
    Address,
    Place,
    Name,
    Service,
    Region,
}

impl EntityType {
    /// Every table, in lock-acquisition order
    pub const ALL: [EntityType; 7] = [
        EntityType::Trip,
        EntityType::Shift,
        EntityType::Address,
        EntityType::Place,
        EntityType::Name,
        EntityType::Service,
        EntityType::Region,
    ];

    /// Table name used in errors and in the snapshot file
    pub fn table_name(self) -> &'static str {
        match self {
            EntityType::Trip => "trips",
            EntityType::Shift => "shifts",
            EntityType::Address => "addresses",
            EntityType::Place => "places",
            EntityType::Name => "names",
            EntityType::Service => "services",
            EntityType::Region => "regions",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Trip => "trip",
            EntityType::Shift => "shift",
            EntityType::Address => "address",
            EntityType::Place => "place",
            EntityType::Name => "name",
            EntityType::Service => "service",
            EntityType::Region => "region",
        }
    }

    /// Duplicates in these tables corrupt aggregate totals
    pub fn affects_totals(self) -> bool {
        matches!(self, EntityType::Trip | EntityType::Shift)
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim().to_lowercase() || t.table_name() == s.trim().to_lowercase())
            .ok_or_else(|| format!("unknown entity type '{}'", s))
    }
}

/// Storable entity
pub trait Record:
    ActionRecord + Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const ENTITY: EntityType;

    /// Secondary indexes available to `query` and `filter`
    const INDEXES: &'static [&'static str];

    /// Exact composite identity; unique within the table
    fn identity_key(&self) -> String;

    /// String value of an indexed field
    fn field(&self, name: &str) -> Option<String>;

    /// Number of non-empty payload fields, used to pick the most complete duplicate
    fn completeness(&self) -> usize;

    /// Copy payload from another version of the same record, keeping local bookkeeping
    fn overwrite_payload(&mut self, other: &Self);

    /// Payload equality, ignoring ids and action bookkeeping
    fn same_payload(&self, other: &Self) -> bool {
        let mut other = other.clone();
        other.set_id(self.id());
        other.set_row_id(self.row_id());
        other.set_action_state(self.action(), self.action_time(), self.saved());
        serde_json::to_value(self).ok() == serde_json::to_value(&other).ok()
    }
}

/// Bookkeeping shared by every entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub row_id: Option<u64>,
    #[serde(default)]
    pub action: Action,
    pub action_time: DateTime<Utc>,
    #[serde(default)]
    pub saved: bool,
}

impl Meta {
    /// Fresh local record: pending add
    pub fn new_add() -> Self {
        Self {
            id: 0,
            row_id: None,
            action: Action::Add,
            action_time: Utc::now(),
            saved: false,
        }
    }
}

macro_rules! impl_action_record {
    ($ty:ty) => {
        impl ActionRecord for $ty {
            fn id(&self) -> u64 {
                self.meta.id
            }
            fn set_id(&mut self, id: u64) {
                self.meta.id = id;
            }
            fn action(&self) -> Action {
                self.meta.action
            }
            fn action_time(&self) -> DateTime<Utc> {
                self.meta.action_time
            }
            fn saved(&self) -> bool {
                self.meta.saved
            }
            fn row_id(&self) -> Option<u64> {
                self.meta.row_id
            }
            fn set_row_id(&mut self, row_id: Option<u64>) {
                self.meta.row_id = row_id;
            }
            fn set_action_state(&mut self, action: Action, at: DateTime<Utc>, saved: bool) {
                self.meta.action = action;
                self.meta.action_time = at;
                self.meta.saved = saved;
            }
        }
    };
}

fn non_empty(values: &[&str]) -> usize {
    values.iter().filter(|v| !v.trim().is_empty()).count()
}

fn non_zero(values: &[f64]) -> usize {
    values.iter().filter(|v| **v != 0.0).count()
}

/// `date|service|number` identity used by trips and shifts
pub fn shift_key(date: &str, service: &str, number: u32) -> String {
    format!("{}|{}|{}", date, service, number)
}

/// A single logged trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    #[serde(flatten)]
    pub meta: Meta,
    pub date: String,
    pub service: String,
    pub number: u32,
    #[serde(default)]
    pub place: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub pickup_time: String,
    #[serde(default)]
    pub dropoff_time: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub start_address: String,
    #[serde(default)]
    pub end_address: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub pay: f64,
    #[serde(default)]
    pub tip: f64,
    #[serde(default)]
    pub bonus: f64,
    #[serde(default)]
    pub cash: f64,
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub exclude: bool,
}

impl Trip {
    pub fn new(date: impl Into<String>, service: impl Into<String>, number: u32) -> Self {
        Self {
            meta: Meta::new_add(),
            date: date.into(),
            service: service.into(),
            number,
            place: String::new(),
            name: String::new(),
            pickup_time: String::new(),
            dropoff_time: String::new(),
            duration: String::new(),
            start_address: String::new(),
            end_address: String::new(),
            region: String::new(),
            pay: 0.0,
            tip: 0.0,
            bonus: 0.0,
            cash: 0.0,
            distance: 0.0,
            note: String::new(),
            exclude: false,
        }
    }

    /// Key of the shift this trip belongs to
    pub fn shift_key(&self) -> String {
        shift_key(&self.date, &self.service, self.number)
    }
}

impl_action_record!(Trip);

impl Record for Trip {
    const ENTITY: EntityType = EntityType::Trip;
    const INDEXES: &'static [&'static str] =
        &["date", "service", "number", "place", "name", "region", "saved"];

    fn identity_key(&self) -> String {
        self.shift_key()
    }

    fn field(&self, name: &str) -> Option<String> {
        match name {
            "date" => Some(self.date.clone()),
            "service" => Some(self.service.clone()),
            "number" => Some(self.number.to_string()),
            "place" => Some(self.place.clone()),
            "name" => Some(self.name.clone()),
            "region" => Some(self.region.clone()),
            "saved" => Some(self.meta.saved.to_string()),
            _ => None,
        }
    }

    fn completeness(&self) -> usize {
        non_empty(&[
            &self.date,
            &self.service,
            &self.place,
            &self.name,
            &self.pickup_time,
            &self.dropoff_time,
            &self.duration,
            &self.start_address,
            &self.end_address,
            &self.region,
            &self.note,
        ]) + non_zero(&[self.pay, self.tip, self.bonus, self.cash, self.distance])
    }

    fn overwrite_payload(&mut self, other: &Self) {
        let meta = self.meta.clone();
        *self = other.clone();
        self.meta = meta;
    }
}

/// A work shift grouping trips
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shift {
    #[serde(flatten)]
    pub meta: Meta,
    pub date: String,
    pub service: String,
    pub number: u32,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub finish: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub trips: u32,
    #[serde(default)]
    pub pay: f64,
    #[serde(default)]
    pub tip: f64,
    #[serde(default)]
    pub bonus: f64,
    #[serde(default)]
    pub cash: f64,
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub note: String,
}

impl Shift {
    pub fn new(date: impl Into<String>, service: impl Into<String>, number: u32) -> Self {
        Self {
            meta: Meta::new_add(),
            date: date.into(),
            service: service.into(),
            number,
            start: String::new(),
            finish: String::new(),
            time: String::new(),
            region: String::new(),
            trips: 0,
            pay: 0.0,
            tip: 0.0,
            bonus: 0.0,
            cash: 0.0,
            distance: 0.0,
            note: String::new(),
        }
    }
}

impl_action_record!(Shift);

impl Record for Shift {
    const ENTITY: EntityType = EntityType::Shift;
    const INDEXES: &'static [&'static str] = &["date", "service", "number", "region", "saved"];

    fn identity_key(&self) -> String {
        shift_key(&self.date, &self.service, self.number)
    }

    fn field(&self, name: &str) -> Option<String> {
        match name {
            "date" => Some(self.date.clone()),
            "service" => Some(self.service.clone()),
            "number" => Some(self.number.to_string()),
            "region" => Some(self.region.clone()),
            "saved" => Some(self.meta.saved.to_string()),
            _ => None,
        }
    }

    fn completeness(&self) -> usize {
        non_empty(&[
            &self.date,
            &self.service,
            &self.start,
            &self.finish,
            &self.time,
            &self.region,
            &self.note,
        ]) + non_zero(&[self.pay, self.tip, self.bonus, self.cash, self.distance])
            + usize::from(self.trips > 0)
    }

    fn overwrite_payload(&mut self, other: &Self) {
        let meta = self.meta.clone();
        *self = other.clone();
        self.meta = meta;
    }
}

/// Extra reference-entity fields that count towards completeness
trait Filled {
    fn is_filled(&self) -> bool;
}

impl Filled for String {
    fn is_filled(&self) -> bool {
        !self.trim().is_empty()
    }
}

impl Filled for Vec<String> {
    fn is_filled(&self) -> bool {
        self.iter().any(|v| !v.trim().is_empty())
    }
}

/// Declares a reference entity identified by one text field
macro_rules! reference_entity {
    (
        $(#[$doc:meta])*
        $name:ident, $entity:expr, $key:ident { $($extra:ident : $extra_ty:ty),* }
    ) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            #[serde(flatten)]
            pub meta: Meta,
            pub $key: String,
            $(
                #[serde(default)]
                pub $extra: $extra_ty,
            )*
        }

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self {
                    meta: Meta::new_add(),
                    $key: value.into(),
                    $($extra: Default::default(),)*
                }
            }

            /// The identifying text
            pub fn label(&self) -> &str {
                &self.$key
            }

            pub fn set_label(&mut self, value: impl Into<String>) {
                self.$key = value.into();
            }
        }

        impl_action_record!($name);

        impl Record for $name {
            const ENTITY: EntityType = $entity;
            const INDEXES: &'static [&'static str] = &[stringify!($key), "saved"];

            fn identity_key(&self) -> String {
                self.$key.clone()
            }

            fn field(&self, name: &str) -> Option<String> {
                match name {
                    stringify!($key) => Some(self.$key.clone()),
                    "saved" => Some(self.meta.saved.to_string()),
                    _ => None,
                }
            }

            fn completeness(&self) -> usize {
                usize::from(!self.$key.trim().is_empty())
                    $(+ usize::from(self.$extra.is_filled()))*
            }

            fn overwrite_payload(&mut self, other: &Self) {
                let meta = self.meta.clone();
                *self = other.clone();
                self.meta = meta;
            }
        }
    };
}

reference_entity!(
    /// A street address seen on trips
    Address, EntityType::Address, address { note: String }
);
reference_entity!(
    /// A pickup location with its known addresses
    Place, EntityType::Place, place { addresses: Vec<String> }
);
reference_entity!(
    /// A customer name
    Name, EntityType::Name, name { note: String }
);
reference_entity!(
    /// A gig platform
    Service, EntityType::Service, service {}
);
reference_entity!(
    /// A delivery region
    Region, EntityType::Region, region {}
);

/// Any entity, tagged by table; the unit of push batches and pulls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "record", rename_all = "snake_case")]
pub enum EntityRecord {
    Trip(Trip),
    Shift(Shift),
    Address(Address),
    Place(Place),
    Name(Name),
    Service(Service),
    Region(Region),
}

impl EntityRecord {
    pub fn entity_type(&self) -> EntityType {
        match self {
            EntityRecord::Trip(_) => EntityType::Trip,
            EntityRecord::Shift(_) => EntityType::Shift,
            EntityRecord::Address(_) => EntityType::Address,
            EntityRecord::Place(_) => EntityType::Place,
            EntityRecord::Name(_) => EntityType::Name,
            EntityRecord::Service(_) => EntityType::Service,
            EntityRecord::Region(_) => EntityType::Region,
        }
    }

    pub fn id(&self) -> u64 {
        self.as_action_record().id()
    }

    pub fn action(&self) -> Action {
        self.as_action_record().action()
    }

    fn as_action_record(&self) -> &dyn ActionRecord {
        match self {
            EntityRecord::Trip(r) => r,
            EntityRecord::Shift(r) => r,
            EntityRecord::Address(r) => r,
            EntityRecord::Place(r) => r,
            EntityRecord::Name(r) => r,
            EntityRecord::Service(r) => r,
            EntityRecord::Region(r) => r,
        }
    }
}

/// Conversion between a concrete entity and its tagged wrapper
pub trait Tagged: Record {
    fn wrap(self) -> EntityRecord;
    fn unwrap_ref(record: &EntityRecord) -> Option<&Self>;
}

macro_rules! impl_tagged {
    ($($ty:ident),*) => {
        $(
            impl Tagged for $ty {
                fn wrap(self) -> EntityRecord {
                    EntityRecord::$ty(self)
                }

                fn unwrap_ref(record: &EntityRecord) -> Option<&Self> {
                    match record {
                        EntityRecord::$ty(r) => Some(r),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_tagged!(Trip, Shift, Address, Place, Name, Service, Region);
