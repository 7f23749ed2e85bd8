//! Geolocation database: a JSON list of `{cidr, country, area}` entries,
//! queried by longest-prefix match.

use astra_common::{AstraError, AstraResult, GeoLocation, GeoLocator};
use ipnet::IpNet;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize)]
struct GeoEntry {
    cidr: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    area: String,
}

#[derive(Debug, Clone, Default)]
pub struct GeoDatabase {
    /// Sorted by prefix length, longest first.
    networks: Vec<(IpNet, GeoLocation)>,
}

impl GeoDatabase {
    /// Load the database. Unreadable files and malformed entries are fatal.
    pub fn load(path: &Path) -> AstraResult<Self> {
        let what = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| AstraError::config_load(&what, e))?;
        let db = Self::from_json(&content).map_err(|e| AstraError::config_load(&what, e))?;
        info!("Loaded {} geolocation networks from {}", db.len(), what);
        Ok(db)
    }

    pub fn from_json(content: &str) -> Result<Self, String> {
        let entries: Vec<GeoEntry> = serde_json::from_str(content).map_err(|e| e.to_string())?;
        let mut networks = Vec::with_capacity(entries.len());
        for entry in entries {
            let net: IpNet = entry
                .cidr
                .parse()
                .map_err(|e| format!("bad cidr {:?}: {e}", entry.cidr))?;
            networks.push((
                net.trunc(),
                GeoLocation {
                    country: entry.country,
                    area: entry.area,
                },
            ));
        }
        networks.sort_by(|a, b| b.0.prefix_len().cmp(&a.0.prefix_len()));
        Ok(Self { networks })
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

impl GeoLocator for GeoDatabase {
    fn locate(&self, ip: IpAddr) -> Option<GeoLocation> {
        self.networks
            .iter()
            .find(|(net, _)| net.contains(&ip))
            .map(|(_, loc)| loc.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DB: &str = r#"[
        {"cidr": "10.0.0.0/8", "country": "Private", "area": "LAN"},
        {"cidr": "10.1.0.0/16", "country": "Private", "area": "Lab"},
        {"cidr": "8.8.8.0/24", "country": "US", "area": "California"},
        {"cidr": "2001:db8::/32", "country": "Doc"}
    ]"#;

    #[test]
    fn longest_prefix_wins() {
        let db = GeoDatabase::from_json(DB).unwrap();
        let lab = db.locate("10.1.2.3".parse().unwrap()).unwrap();
        assert_eq!(lab.area, "Lab");
        let lan = db.locate("10.9.9.9".parse().unwrap()).unwrap();
        assert_eq!(lan.area, "LAN");
        assert_eq!(db.locate("8.8.8.8".parse().unwrap()).unwrap().country, "US");
        assert_eq!(db.locate("2001:db8::1".parse().unwrap()).unwrap().country, "Doc");
        assert!(db.locate("1.1.1.1".parse().unwrap()).is_none());
    }

    #[test]
    fn load_errors_are_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"cidr": "not-a-cidr"}}]"#).unwrap();
        assert!(GeoDatabase::load(file.path()).unwrap_err().is_fatal());
        assert!(GeoDatabase::load(Path::new("/nonexistent/geo.json"))
            .unwrap_err()
            .is_fatal());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{DB}").unwrap();
        assert_eq!(GeoDatabase::load(file.path()).unwrap().len(), 4);
    }
}
