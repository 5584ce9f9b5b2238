//! The fixed first-generation region catalog.
//!
//! The legacy APIs never exposed a region listing; the three regions and
//! their single data centers are hardwired. UK accounts see only London,
//! everyone else sees the two US regions.

use serde::{Deserialize, Serialize};

/// One of the three first-generation regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegacyRegion {
    /// Chicago
    Ord,
    /// Dallas/Fort Worth
    Dfw,
    /// London
    Lon,
}

impl LegacyRegion {
    /// All regions, in catalog order.
    pub const ALL: [Self; 3] = [Self::Ord, Self::Dfw, Self::Lon];

    /// The region id as the provider tags it.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::Ord => "xORD",
            Self::Dfw => "xDFW",
            Self::Lon => "xLON",
        }
    }

    /// The DNS label used in per-region service hosts.
    #[must_use]
    pub const fn subdomain(self) -> &'static str {
        match self {
            Self::Ord => "ord",
            Self::Dfw => "dfw",
            Self::Lon => "lon",
        }
    }

    /// Display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ord => "Chicago (ORD)",
            Self::Dfw => "Dallas (DFW)",
            Self::Lon => "London (LON)",
        }
    }

    /// Governing jurisdiction.
    #[must_use]
    pub const fn jurisdiction(self) -> &'static str {
        match self {
            Self::Lon => "EU",
            _ => "US",
        }
    }

    /// Look a region up by its id.
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.id() == id)
    }
}

/// A region as presented to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Provider region id
    pub region_id: String,
    /// Display name
    pub name: String,
    /// Governing jurisdiction
    pub jurisdiction: String,
}

impl From<LegacyRegion> for Region {
    fn from(region: LegacyRegion) -> Self {
        Self {
            region_id: region.id().to_string(),
            name: region.name().to_string(),
            jurisdiction: region.jurisdiction().to_string(),
        }
    }
}

/// A data center within a region. Each legacy region exposes exactly one,
/// with the region id suffixed by "1".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCenter {
    /// Data center id (`{region_id}1`)
    pub dc_id: String,
    /// Display name (same as the region's)
    pub name: String,
    /// Owning region id
    pub region_id: String,
}

impl From<LegacyRegion> for DataCenter {
    fn from(region: LegacyRegion) -> Self {
        Self {
            dc_id: format!("{}1", region.id()),
            name: region.name().to_string(),
            region_id: region.id().to_string(),
        }
    }
}

/// List the regions visible to an account. UK accounts are scoped to London;
/// US accounts to the two US regions.
#[must_use]
pub fn list_regions(uk_account: bool) -> Vec<Region> {
    LegacyRegion::ALL
        .into_iter()
        .filter(|r| (*r == LegacyRegion::Lon) == uk_account)
        .map(Region::from)
        .collect()
}

/// Look a region up by id, honoring the account's UK scoping.
#[must_use]
pub fn find_region(uk_account: bool, region_id: &str) -> Option<Region> {
    list_regions(uk_account)
        .into_iter()
        .find(|r| r.region_id == region_id)
}

/// List the data centers of a region (always exactly one for a known region).
#[must_use]
pub fn list_data_centers(region_id: &str) -> Vec<DataCenter> {
    LegacyRegion::from_id(region_id)
        .map(|r| vec![DataCenter::from(r)])
        .unwrap_or_default()
}

/// Look a data center up by its id, recovering the owning region from the
/// trailing "1".
#[must_use]
pub fn find_data_center(dc_id: &str) -> Option<DataCenter> {
    let region_id = dc_id.strip_suffix('1')?;
    let region = LegacyRegion::from_id(region_id)?;
    Some(DataCenter::from(region))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn us_accounts_see_us_regions_only() {
        let regions = list_regions(false);
        let ids: Vec<_> = regions.iter().map(|r| r.region_id.as_str()).collect();
        assert_eq!(ids, ["xORD", "xDFW"]);
        assert!(regions.iter().all(|r| r.jurisdiction == "US"));
    }

    #[test]
    fn uk_accounts_see_london_only() {
        let regions = list_regions(true);
        let ids: Vec<_> = regions.iter().map(|r| r.region_id.as_str()).collect();
        assert_eq!(ids, ["xLON"]);
        assert_eq!(regions[0].jurisdiction, "EU");
    }

    #[test]
    fn region_lookup_honors_scoping() {
        assert!(find_region(false, "xDFW").is_some());
        assert!(find_region(false, "xLON").is_none());
        assert!(find_region(true, "xLON").is_some());
        assert!(find_region(true, "xORD").is_none());
    }

    #[test]
    fn data_center_id_round_trip() {
        let dcs = list_data_centers("xORD");
        assert_eq!(dcs.len(), 1);
        assert_eq!(dcs[0].dc_id, "xORD1");

        let dc = find_data_center("xORD1").unwrap();
        assert_eq!(dc.region_id, "xORD");
        assert!(find_data_center("xORD").is_none());
        assert!(find_data_center("bogus1").is_none());
    }
}
