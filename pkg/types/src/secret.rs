use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::meta::ObjectMeta;
use pkg_constants::annotations::{CA_CERT_KEY, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY};

/// Secret holding PEM material. Values are kept decoded.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    pub metadata: ObjectMeta,
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Secret {
    pub fn tls_cert(&self) -> Option<&str> {
        self.value(TLS_CERT_KEY)
    }

    pub fn tls_key(&self) -> Option<&str> {
        self.value(TLS_PRIVATE_KEY_KEY)
    }

    pub fn ca_cert(&self) -> Option<&str> {
        self.value(CA_CERT_KEY)
    }

    fn value(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("metadata", &self.metadata)
            .field("type", &self.type_)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}
