//! Host inventory boundary.
//!
//! The gateway never owns host records — it consumes them read-only through
//! [`HostDirectory`]. The shipped implementation is a static table loaded
//! from the config file; a persistence-backed directory can be dropped in
//! behind the same trait.
//!
//! Credential values never reach the logs: [`HostDescriptor`]'s `Debug` impl
//! redacts the password.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

/// Connection coordinates and credentials for one remote host.
#[derive(Clone, Deserialize)]
pub struct HostDescriptor {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Human-readable name shown in logs instead of credentials.
    pub display_name: String,
}

impl fmt::Debug for HostDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// Read-only lookup of host descriptors by session id.
#[async_trait::async_trait]
pub trait HostDirectory: Send + Sync {
    async fn find(&self, id: &str) -> Option<HostDescriptor>;
}

/// One `[[hosts]]` entry in the config file.
#[derive(Clone, Debug, Deserialize)]
pub struct HostEntry {
    pub id: String,
    #[serde(flatten)]
    pub descriptor: HostDescriptor,
}

/// In-memory directory built from the config file's `[[hosts]]` table.
pub struct StaticDirectory {
    hosts: HashMap<String, HostDescriptor>,
}

impl StaticDirectory {
    pub fn new(entries: Vec<HostEntry>) -> Self {
        let hosts = entries
            .into_iter()
            .map(|e| (e.id, e.descriptor))
            .collect::<HashMap<_, _>>();
        Self { hosts }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

#[async_trait::async_trait]
impl HostDirectory for StaticDirectory {
    async fn find(&self, id: &str) -> Option<HostDescriptor> {
        self.hosts.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HostDescriptor {
        HostDescriptor {
            host: "10.0.0.5".into(),
            port: 22,
            username: "deploy".into(),
            password: "s3cret".into(),
            display_name: "staging box".into(),
        }
    }

    #[tokio::test]
    async fn find_hit_and_miss() {
        let dir = StaticDirectory::new(vec![HostEntry {
            id: "op-1".into(),
            descriptor: sample(),
        }]);
        assert!(dir.find("op-1").await.is_some());
        assert!(dir.find("op-2").await.is_none());
    }

    #[test]
    fn debug_redacts_password() {
        let rendered = format!("{:?}", sample());
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
        assert!(rendered.contains("staging box"));
    }
}
