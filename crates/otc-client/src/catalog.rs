//! identity service catalog as returned with a token.

use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub entries: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Endpoint {
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub region_id: Option<String>,
    pub url: String,
}

impl Endpoint {
    fn serves(&self, region: &str) -> bool {
        match (self.region.as_deref(), self.region_id.as_deref()) {
            (None, None) => true,
            (region_name, region_id) => {
                region_name.map_or(false, |name| name == region || name == "*")
                    || region_id.map_or(false, |id| id == region)
            }
        }
    }
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// public endpoint url of `service_type` in `region`.
    ///
    /// endpoints without a region are global and match every region.
    pub fn endpoint(&self, service_type: &str, region: &str) -> Option<&str> {
        self.entries
            .iter()
            .filter(|entry| entry.service_type == service_type)
            .flat_map(|entry| entry.endpoints.iter())
            .filter(|endpoint| endpoint.interface.is_empty() || endpoint.interface == "public")
            .find(|endpoint| endpoint.serves(region))
            .map(|endpoint| endpoint.url.as_str())
    }
}
