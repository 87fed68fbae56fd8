use anyhow::{Context, anyhow, bail};
use chrono::{DateTime, Utc};
use x509_parser::prelude::*;

/// Facts about the leaf certificate of a PEM chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub common_name: String,
    /// Lowercase hex, no separators.
    pub serial_number: String,
    pub not_after: DateTime<Utc>,
    /// DNS subject alternative names, lowercased.
    pub dns_names: Vec<String>,
}

impl CertificateInfo {
    /// Parse the first certificate of a PEM bundle.
    pub fn from_pem(pem: &str) -> anyhow::Result<Self> {
        let mut reader = pem.as_bytes();
        let der = match rustls_pemfile::certs(&mut reader).next() {
            Some(cert) => cert.context("failed to read PEM certificate")?,
            None => bail!("no certificate found in PEM data"),
        };
        let (_, cert) = X509Certificate::from_der(der.as_ref())
            .map_err(|e| anyhow!("failed to parse certificate: {}", e))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();

        let serial_number = cert
            .raw_serial()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<String>();

        let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| anyhow!("certificate notAfter is out of range"))?;

        let mut dns_names = Vec::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                if let GeneralName::DNSName(dns) = name {
                    dns_names.push(dns.to_ascii_lowercase());
                }
            }
        }

        Ok(Self {
            common_name,
            serial_number,
            not_after,
            dns_names,
        })
    }

    /// Whether this certificate is valid for `host`. The common name is only
    /// consulted when the certificate carries no DNS SANs.
    pub fn covers(&self, host: &str) -> bool {
        if self.dns_names.is_empty() {
            return !self.common_name.is_empty() && san_covers(&self.common_name, host);
        }
        self.dns_names.iter().any(|san| san_covers(san, host))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.not_after <= now
    }
}

/// RFC 6125 §6.4.3 matching of a presented identifier against a reference
/// host. A wildcard must be the whole left-most label and covers exactly one
/// label. A wildcard host (`*.a.b`) is covered by an equal wildcard SAN.
pub fn san_covers(san: &str, host: &str) -> bool {
    let san = san.trim_end_matches('.').to_ascii_lowercase();
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if san.is_empty() || host.is_empty() {
        return false;
    }
    if san == host {
        return true;
    }
    let Some(san_suffix) = san.strip_prefix("*.") else {
        return false;
    };
    match host.split_once('.') {
        Some((label, suffix)) => !label.is_empty() && label != "*" && suffix == san_suffix,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_cert(names: &[&str]) -> (String, String) {
        let names = names.iter().map(|n| n.to_string()).collect::<Vec<_>>();
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(names).unwrap();
        (cert.pem(), key_pair.serialize_pem())
    }

    #[test]
    fn parses_self_signed_certificate() {
        let (pem, _) = make_cert(&["a.example", "*.example"]);
        let info = CertificateInfo::from_pem(&pem).unwrap();
        assert_eq!(info.dns_names, vec!["a.example", "*.example"]);
        assert!(!info.serial_number.is_empty());
        assert!(info.serial_number.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!info.is_expired(Utc::now()));
    }

    #[test]
    fn rejects_non_certificate_pem() {
        let (_, key) = make_cert(&["a.example"]);
        assert!(CertificateInfo::from_pem(&key).is_err());
        assert!(CertificateInfo::from_pem("garbage").is_err());
    }

    #[test]
    fn coverage_uses_sans() {
        let (pem, _) = make_cert(&["a.example", "*.example"]);
        let info = CertificateInfo::from_pem(&pem).unwrap();
        assert!(info.covers("a.example"));
        assert!(info.covers("X.Example"));
        assert!(!info.covers("deep.x.example"));
        assert!(!info.covers("other.test"));
    }

    #[test]
    fn wildcard_rules() {
        assert!(san_covers("*.example.com", "www.example.com"));
        assert!(!san_covers("*.example.com", "example.com"));
        assert!(!san_covers("*.example.com", "a.b.example.com"));
        assert!(san_covers("*.example.com", "*.example.com"));
        assert!(!san_covers("www.example.com", "*.example.com"));
        assert!(san_covers("*.example", "x.example"));
        assert!(!san_covers("*", "example"));
        assert!(!san_covers("w*.example.com", "www.example.com"));
        assert!(san_covers("Example.COM.", "example.com"));
    }
}
