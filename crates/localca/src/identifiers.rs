use std::net::IpAddr;

use rcgen::string::Ia5String;
use rcgen::SanType;

use crate::CaError;

/// A requested certificate identifier after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectName {
    Ip(IpAddr),
    Email(String),
    Uri(String),
    Dns(String),
}

impl SubjectName {
    /// Classify in order: IP literal, exact email address, absolute URI with a
    /// host, and finally DNS name for everything else.
    pub fn classify(identifier: &str) -> Self {
        if let Ok(ip) = identifier.parse::<IpAddr>() {
            return Self::Ip(ip);
        }
        if is_email_address(identifier) {
            return Self::Email(identifier.to_string());
        }
        if is_absolute_uri_with_host(identifier) {
            return Self::Uri(identifier.to_string());
        }
        Self::Dns(identifier.to_string())
    }

    pub fn is_ip_or_dns(&self) -> bool {
        matches!(self, Self::Ip(_) | Self::Dns(_))
    }

    pub(crate) fn to_san(&self) -> Result<SanType, CaError> {
        let encode = |value: &str| -> Result<Ia5String, CaError> {
            Ia5String::try_from(value)
                .map_err(|error| CaError::InvalidIdentifiers(format!("{value:?}: {error}")))
        };
        Ok(match self {
            Self::Ip(ip) => SanType::IpAddress(*ip),
            Self::Email(address) => SanType::Rfc822Name(encode(address)?),
            Self::Uri(uri) => SanType::URI(encode(uri)?),
            Self::Dns(name) => SanType::DnsName(encode(name)?),
        })
    }
}

fn is_absolute_uri_with_host(identifier: &str) -> bool {
    match url::Url::parse(identifier) {
        Ok(parsed) => parsed.host_str().is_some_and(|host| !host.is_empty()),
        Err(_) => false,
    }
}

/// A bare `local@domain` address in dot-atom form; display names, angle
/// brackets, comments and quoted local parts are rejected since the address
/// must match the identifier exactly.
fn is_email_address(identifier: &str) -> bool {
    let Some((local, domain)) = identifier.rsplit_once('@') else {
        return false;
    };
    is_dot_atom(local) && is_dot_atom(domain)
}

fn is_dot_atom(value: &str) -> bool {
    !value.is_empty()
        && value
            .split('.')
            .all(|atom| !atom.is_empty() && atom.chars().all(is_atext))
}

fn is_atext(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-/=?^_`{|}~".contains(c)
}
