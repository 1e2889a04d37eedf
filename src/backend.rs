use std::fmt;

/// Which chain an upstream node speaks.
///
/// Bitcoin backends are catalog entries and healthcheck targets only; the
/// request pipeline currently serves Ethereum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Ethereum,
    Bitcoin,
}

impl BackendKind {
    /// Parse the catalog `type` column ('ETH' or 'BTC').
    pub fn from_catalog(s: &str) -> Option<Self> {
        match s {
            "ETH" => Some(BackendKind::Ethereum),
            "BTC" => Some(BackendKind::Bitcoin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Ethereum => "ETH",
            BackendKind::Bitcoin => "BTC",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One upstream node from the backend catalog. Static after load and shared
/// read-only between the request handlers and the background tasks.
#[derive(Debug, Clone)]
pub struct Backend {
    pub url: String,
    pub name: String,
    pub is_main: bool,
    pub kind: BackendKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_catalog() {
        assert_eq!(BackendKind::from_catalog("ETH"), Some(BackendKind::Ethereum));
        assert_eq!(BackendKind::from_catalog("BTC"), Some(BackendKind::Bitcoin));
        assert_eq!(BackendKind::from_catalog("XMR"), None);
        assert_eq!(BackendKind::from_catalog("eth"), None);
    }
}
