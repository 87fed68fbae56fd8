use anyhow::{Result, bail};

use pkg_constants::paths::TEMPLATE_PLACEHOLDERS;

/// Validate a DNS-1123 label.
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > 63 {
        bail!("name '{}' exceeds 63 characters (got {})", name, name.len());
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("name '{}' must not start or end with a hyphen", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "name '{}' must contain only lowercase letters, digits, and hyphens [a-z0-9-]",
            name
        );
    }
    Ok(())
}

/// Validate a DNS-1123 subdomain: dot-separated labels, max 253 chars.
pub fn validate_subdomain(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("subdomain must not be empty");
    }
    if name.len() > 253 {
        bail!("subdomain '{}' exceeds 253 characters", name);
    }
    for label in name.split('.') {
        validate_name(label)?;
    }
    Ok(())
}

/// Validate a hostname as used by listeners and routes. A single leading
/// `*.` wildcard label is allowed; comparison is case-insensitive.
pub fn validate_hostname(host: &str) -> Result<()> {
    let lower = host.to_ascii_lowercase();
    let rest = lower.strip_prefix("*.").unwrap_or(&lower);
    if rest.contains('*') {
        bail!("hostname '{}' may only use a wildcard as its left-most label", host);
    }
    validate_subdomain(rest)
}

/// Validate a base-path template: balanced braces, known placeholders only.
pub fn validate_template(template: &str) -> Result<()> {
    if !template.starts_with('/') {
        bail!("template '{}' must be an absolute path", template);
    }
    let mut rest = template;
    while let Some(open) = rest.find(['{', '}']) {
        if rest.as_bytes()[open] == b'}' {
            bail!("template '{}' has an unbalanced '}}'", template);
        }
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            bail!("template '{}' has an unclosed '{{'", template);
        };
        let name = &after[..close];
        if name.contains('{') {
            bail!("template '{}' has a nested '{{'", template);
        }
        if !TEMPLATE_PLACEHOLDERS.contains(&name) {
            bail!("template '{}' uses unknown placeholder '{{{}}}'", template, name);
        }
        rest = &after[close + 1..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        assert!(validate_name("nginx").is_ok());
        assert!(validate_name("west-1").is_ok());
        assert!(validate_name("a").is_ok());
    }

    #[test]
    fn invalid_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name("My-App").is_err());
        assert!(validate_name("my_app").is_err());
        assert!(validate_name("-leading").is_err());
        assert!(validate_name("trailing-").is_err());
        assert!(validate_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn subdomains_and_hostnames() {
        assert!(validate_subdomain("api.example.com").is_ok());
        assert!(validate_subdomain("api..example").is_err());
        assert!(validate_hostname("*.example.com").is_ok());
        assert!(validate_hostname("Foo.Example.com").is_ok());
        assert!(validate_hostname("foo.*.com").is_err());
        assert!(validate_hostname("*").is_err());
    }

    #[test]
    fn templates() {
        assert!(validate_template("/{region}/{zone}/{group}/{cluster}/ingress/").is_ok());
        assert!(validate_template("/{region}/gateways/{namespace}/").is_ok());
        assert!(validate_template("/static/path/").is_ok());
        assert!(validate_template("{region}/").is_err());
        assert!(validate_template("/{region/").is_err());
        assert!(validate_template("/region}/").is_err());
        assert!(validate_template("/{planet}/").is_err());
    }
}
