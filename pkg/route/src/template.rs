use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fleet coordinates of one cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteBase {
    pub region: String,
    pub zone: String,
    pub group: String,
    pub cluster: String,
}

impl RouteBase {
    pub fn new(
        region: impl Into<String>,
        zone: impl Into<String>,
        group: impl Into<String>,
        cluster: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            zone: zone.into(),
            group: group.into(),
            cluster: cluster.into(),
        }
    }

    /// Expand a base-path template. `{namespace}` requires `namespace`.
    pub fn evaluate(&self, template: &str, namespace: Option<&str>) -> anyhow::Result<String> {
        let mut path = template
            .replace("{region}", &self.region)
            .replace("{zone}", &self.zone)
            .replace("{group}", &self.group)
            .replace("{cluster}", &self.cluster);
        if path.contains("{namespace}") {
            match namespace {
                Some(ns) if !ns.is_empty() => path = path.replace("{namespace}", ns),
                _ => bail!("template '{}' needs a namespace", template),
            }
        }
        if path.contains(['{', '}']) {
            bail!("template '{}' has unresolved placeholders", template);
        }
        Ok(path)
    }
}

impl fmt::Display for RouteBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.region, self.zone, self.group, self.cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_constants::paths::{
        DEFAULT_GATEWAY_PATH_TEMPLATE, DEFAULT_INGRESS_PATH_TEMPLATE, DEFAULT_SERVICE_PATH_TEMPLATE,
    };

    #[test]
    fn evaluates_default_templates() {
        let base = RouteBase::new("eu", "west-1", "default", "c1");
        assert_eq!(
            base.evaluate(DEFAULT_INGRESS_PATH_TEMPLATE, None).unwrap(),
            "/eu/west-1/default/c1/ingress/"
        );
        assert_eq!(
            base.evaluate(DEFAULT_SERVICE_PATH_TEMPLATE, None).unwrap(),
            "/eu/west-1/default/c1/services/"
        );
        assert_eq!(
            base.evaluate(DEFAULT_GATEWAY_PATH_TEMPLATE, Some("ns1")).unwrap(),
            "/eu/west-1/default/c1/gateways/ns1/"
        );
        assert_eq!(base.to_string(), "eu/west-1/default/c1");
    }

    #[test]
    fn namespace_is_required_when_templated() {
        let base = RouteBase::new("eu", "west-1", "default", "c1");
        assert!(base.evaluate(DEFAULT_GATEWAY_PATH_TEMPLATE, None).is_err());
        assert!(base.evaluate("/{planet}/", None).is_err());
    }
}
