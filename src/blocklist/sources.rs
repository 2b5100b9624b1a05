//! Remote block list sources, three categories times two kinds.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Malicious,
    Ads,
    Surveillance,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Malicious, Category::Ads, Category::Surveillance];
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malicious => write!(f, "malicious"),
            Self::Ads => write!(f, "ads"),
            Self::Surveillance => write!(f, "surveillance"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Hostnames,
    Ips,
}

impl ListKind {
    pub const ALL: [ListKind; 2] = [ListKind::Hostnames, ListKind::Ips];
}

/// Download URL for one (category, kind) pair.
pub fn url(category: Category, kind: ListKind) -> &'static str {
    match (category, kind) {
        (Category::Malicious, ListKind::Hostnames) => {
            "https://raw.githubusercontent.com/qdm12/files/master/malicious-hostnames.updated"
        }
        (Category::Malicious, ListKind::Ips) => {
            "https://raw.githubusercontent.com/qdm12/files/master/malicious-ips.updated"
        }
        (Category::Ads, ListKind::Hostnames) => {
            "https://raw.githubusercontent.com/qdm12/files/master/ads-hostnames.updated"
        }
        (Category::Ads, ListKind::Ips) => {
            "https://raw.githubusercontent.com/qdm12/files/master/ads-ips.updated"
        }
        (Category::Surveillance, ListKind::Hostnames) => {
            "https://raw.githubusercontent.com/qdm12/files/master/surveillance-hostnames.updated"
        }
        (Category::Surveillance, ListKind::Ips) => {
            "https://raw.githubusercontent.com/qdm12/files/master/surveillance-ips.updated"
        }
    }
}
