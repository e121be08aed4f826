use courier_config::ClientPlatform;
use std::cmp::Ordering;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UserAgentError {
    #[error("unrecognized user agent")]
    Unrecognized,
    #[error("invalid client version: {0}")]
    InvalidVersion(String),
}

/// Dotted numeric version; missing components compare as zero
#[derive(Debug, Clone, Eq)]
pub struct ClientVersion(Vec<u64>);

impl ClientVersion {
    fn component(&self, i: usize) -> u64 {
        self.0.get(i).copied().unwrap_or(0)
    }
}

impl FromStr for ClientVersion {
    type Err = UserAgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Pre-release and build suffixes ("5.12.0-beta.1") are ignored
        let core = s.split(['-', '+']).next().unwrap_or_default();
        let parts = core
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| UserAgentError::InvalidVersion(s.to_string()))?;
        if parts.is_empty() {
            return Err(UserAgentError::InvalidVersion(s.to_string()));
        }
        Ok(Self(parts))
    }
}

impl PartialEq for ClientVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for ClientVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ClientVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

/// `Courier-Android/5.12.0 Android/30` and friends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgent {
    pub platform: ClientPlatform,
    pub version: ClientVersion,
    pub additional: Option<String>,
}

impl FromStr for UserAgent {
    type Err = UserAgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (product, additional) = match s.split_once(' ') {
            Some((product, rest)) => (product, Some(rest.trim().to_string())),
            None => (s, None),
        };
        let (name, version) = product.split_once('/').ok_or(UserAgentError::Unrecognized)?;

        let platform = match name.to_ascii_lowercase().as_str() {
            "courier-android" => ClientPlatform::Android,
            "courier-ios" => ClientPlatform::Ios,
            "courier-desktop" => ClientPlatform::Desktop,
            _ => return Err(UserAgentError::Unrecognized),
        };

        Ok(Self {
            platform,
            version: version.parse()?,
            additional: additional.filter(|a| !a.is_empty()),
        })
    }
}
