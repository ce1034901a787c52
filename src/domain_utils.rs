/// Minimal domain hierarchy utilities
pub struct DomainUtils;

const TWO_LABEL_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "gov.uk", "ac.uk", "ltd.uk", "plc.uk", "me.uk", "net.uk", "nhs.uk",
    "com.au", "net.au", "org.au", "edu.au", "gov.au", "co.jp", "ne.jp", "or.jp", "co.kr",
    "com.br", "co.za", "com.mx", "co.in", "com.sg", "co.nz", "com.ar", "co.il", "com.cn",
    "com.tr", "com.hk", "com.tw", "co.id", "com.my",
];

impl DomainUtils {
    /// Extract the lower-cased host part of an email address.
    pub fn extract_domain(email: &str) -> Option<String> {
        let at_pos = email.rfind('@')?;
        if at_pos == 0 {
            return None;
        }
        let domain = email[at_pos + 1..]
            .trim()
            .trim_end_matches('>')
            .trim_end_matches('.')
            .to_lowercase();
        if domain.contains('.')
            && domain
                .chars()
                .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
        {
            Some(domain)
        } else {
            None
        }
    }

    /// Registrable domain (effective TLD plus one label).
    /// e.g. "email.nationalgeographic.com" -> "nationalgeographic.com",
    /// "mail.bank.co.uk" -> "bank.co.uk"
    pub fn registrable_domain(host: &str) -> String {
        let host = host.trim_end_matches('.').to_lowercase();
        let parts: Vec<&str> = host.split('.').collect();
        if parts.len() < 2 {
            return host;
        }
        let last_two = format!("{}.{}", parts[parts.len() - 2], parts[parts.len() - 1]);
        if parts.len() >= 3 && TWO_LABEL_SUFFIXES.contains(&last_two.as_str()) {
            return format!("{}.{}", parts[parts.len() - 3], last_two);
        }
        last_two
    }

    /// Canonicalize domain (remove www prefix)
    pub fn canonicalize_domain(domain: &str) -> String {
        let domain_lower = domain.to_lowercase();
        if let Some(stripped) = domain_lower.strip_prefix("www.") {
            stripped.to_string()
        } else {
            domain_lower
        }
    }

    /// Host of a URL with any leading "www." removed.
    pub fn url_host(raw_url: &str) -> Option<String> {
        url::Url::parse(raw_url)
            .ok()?
            .host_str()
            .map(Self::canonicalize_domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            DomainUtils::extract_domain("user@Example.com"),
            Some("example.com".to_string())
        );
        assert_eq!(
            DomainUtils::extract_domain("<billing@mail.paypal.com>"),
            Some("mail.paypal.com".to_string())
        );
        assert_eq!(DomainUtils::extract_domain("invalid"), None);
        assert_eq!(DomainUtils::extract_domain("@example.com"), None);
    }

    #[test]
    fn test_registrable_domain() {
        assert_eq!(
            DomainUtils::registrable_domain("email.nationalgeographic.com"),
            "nationalgeographic.com"
        );
        assert_eq!(DomainUtils::registrable_domain("mail.bank.co.uk"), "bank.co.uk");
        assert_eq!(DomainUtils::registrable_domain("example.com"), "example.com");
        assert_eq!(DomainUtils::registrable_domain("localhost"), "localhost");
    }

    #[test]
    fn test_canonicalize_domain() {
        assert_eq!(
            DomainUtils::canonicalize_domain("www.example.com"),
            "example.com"
        );
        assert_eq!(
            DomainUtils::canonicalize_domain("example.com"),
            "example.com"
        );
    }

    #[test]
    fn test_url_host() {
        assert_eq!(
            DomainUtils::url_host("https://www.acme.com/about"),
            Some("acme.com".to_string())
        );
        assert_eq!(DomainUtils::url_host("not a url"), None);
    }
}
