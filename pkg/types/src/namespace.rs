use serde::{Deserialize, Serialize};

use crate::meta::ObjectMeta;

/// Namespaces are watched for their labels (route namespace selectors).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    pub metadata: ObjectMeta,
}
