use crate::record::LocationRecord;
use dashmap::DashMap;
use std::collections::HashMap;


/// Assigns each agent id a stable hue for the session.
///
/// The hue is a deterministic FNV-1a hash of the id (std's hasher is
/// randomly seeded per process, which would break visual identity
/// across restarts). Assignments are first-seen-wins and never
/// recomputed, even if the id disappears and reappears.
pub struct ColorAssigner {
    assigned: DashMap<String, u16>,
}

impl ColorAssigner {
    pub fn new() -> Self {
        Self {
            assigned: DashMap::new(),
        }
    }

    /// Hue in [0, 360) for this id
    pub fn hue_for(&self, id: &str) -> u16 {
        *self
            .assigned
            .entry(id.to_string())
            .or_insert_with(|| hash_hue(id))
    }

    /// CSS color string for marker icons
    pub fn css_color(&self, id: &str) -> String {
        format!("hsl({}, 85%, 45%)", self.hue_for(id))
    }
}

impl Default for ColorAssigner {
    fn default() -> Self {
        Self::new()
    }
}

/// FNV-1a over the id bytes, reduced to a hue
fn hash_hue(id: &str) -> u16 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for byte in id.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    (hash % 360) as u16
}

/// Records ordered by display label (case-insensitive), ties broken by
/// id
pub fn sorted_listing(records: &HashMap<String, LocationRecord>) -> Vec<LocationRecord> {
    let mut listing: Vec<LocationRecord> = records.values().cloned().collect();
    listing.sort_by(|a, b| {
        a.label()
            .to_lowercase()
            .cmp(&b.label().to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    });
    listing
}

/// The record belonging to the resolved identity, matched by contact
/// value; `None` when the agent is not publishing
pub fn find_self<'a>(
    records: &'a HashMap<String, LocationRecord>,
    contact_identity: &str,
) -> Option<&'a LocationRecord> {
    records
        .values()
        .find(|record| record.contact_identity.as_deref() == Some(contact_identity))
}
