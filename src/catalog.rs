//! Read-only collaborators the engine consults: the service catalog and the
//! registered-guest directory. Both are looked up before a room lock is
//! taken, so slow backends never stall scheduling.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::Amount;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceItem {
    pub id: Ulid,
    pub name: String,
    pub price: Amount,
    /// Catalog flag: unavailable services cannot be attached to new stays.
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestProfile {
    pub user_id: String,
    pub name: String,
    pub phone: Option<String>,
}

#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    async fn service(&self, id: &Ulid) -> Option<ServiceItem>;
}

#[async_trait]
pub trait GuestDirectory: Send + Sync {
    async fn guest(&self, user_id: &str) -> Option<GuestProfile>;
}

// ── In-memory implementations ────────────────────────────────────

pub struct InMemoryCatalog {
    services: DashMap<Ulid, ServiceItem>,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    pub fn insert_service(&self, item: ServiceItem) {
        self.services.insert(item.id, item);
    }

    pub fn remove_service(&self, id: &Ulid) -> Option<ServiceItem> {
        self.services.remove(id).map(|(_, item)| item)
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

#[async_trait]
impl ServiceCatalog for InMemoryCatalog {
    async fn service(&self, id: &Ulid) -> Option<ServiceItem> {
        self.services.get(id).map(|e| e.value().clone())
    }
}

pub struct InMemoryDirectory {
    guests: DashMap<String, GuestProfile>,
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            guests: DashMap::new(),
        }
    }

    pub fn insert_guest(&self, profile: GuestProfile) {
        self.guests.insert(profile.user_id.clone(), profile);
    }

    pub fn guest_count(&self) -> usize {
        self.guests.len()
    }
}

#[async_trait]
impl GuestDirectory for InMemoryDirectory {
    async fn guest(&self, user_id: &str) -> Option<GuestProfile> {
        self.guests.get(user_id).map(|e| e.value().clone())
    }
}

// ── Seed file ────────────────────────────────────────────────────

/// JSON document used to populate the in-memory collaborators at startup.
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub services: Vec<ServiceItem>,
    #[serde(default)]
    pub guests: Vec<GuestProfile>,
}

impl Seed {
    pub fn load(path: &Path) -> io::Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        serde_json::from_reader(reader).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn apply(self, catalog: &InMemoryCatalog, directory: &InMemoryDirectory) {
        for item in self.services {
            catalog.insert_service(item);
        }
        for profile in self.guests {
            directory.insert_guest(profile);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn catalog_lookup() {
        let catalog = InMemoryCatalog::new();
        let id = Ulid::new();
        catalog.insert_service(ServiceItem {
            id,
            name: "Breakfast".into(),
            price: 15,
            available: true,
        });
        assert_eq!(catalog.service(&id).await.unwrap().price, 15);
        assert!(catalog.service(&Ulid::new()).await.is_none());

        catalog.remove_service(&id);
        assert_eq!(catalog.service_count(), 0);
    }

    #[test]
    fn seed_parses_partial_documents() {
        let json = r#"{"guests":[{"user_id":"u-1","name":"Mai","phone":null}]}"#;
        let seed: Seed = serde_json::from_str(json).unwrap();
        assert!(seed.services.is_empty());

        let catalog = InMemoryCatalog::new();
        let directory = InMemoryDirectory::new();
        seed.apply(&catalog, &directory);
        assert_eq!(directory.guest_count(), 1);
    }

    #[test]
    fn seed_load_reports_bad_json() {
        let dir = std::env::temp_dir().join("innkeep_test_catalog");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad_seed.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = Seed::load(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let _ = std::fs::remove_file(&path);
    }
}
