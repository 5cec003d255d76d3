//! EON-ID profile record and the pylon (dashboard widget) toggles.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::validate::{ModelError, check_len, check_url};

/// Pylons the dashboard knows how to render, in display order.
pub const KNOWN_PYLONS: &[&str] = &[
    "show_refraGate",
    "show_aetherFeed",
    "show_holdings",
    "show_chat",
    "show_badges",
    "show_socials",
];

const MAX_DISPLAY_NAME: usize = 32;
const MAX_BIO: usize = 280;
const MAX_BADGES: usize = 8;
const MAX_PYLON_NAME: usize = 64;

/// Named boolean toggles. Known pylons default to enabled; unknown names are
/// only enabled when stored as `true`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pylons(BTreeMap<String, bool>);

impl Pylons {
    pub fn is_enabled(&self, name: &str) -> bool {
        match self.0.get(name) {
            Some(enabled) => *enabled,
            None => KNOWN_PYLONS.contains(&name),
        }
    }

    pub fn set(&mut self, name: &str, enabled: bool) {
        self.0.insert(name.to_string(), enabled);
    }

    /// Enabled pylons: known ones in display order, then any extra stored
    /// names alphabetically.
    pub fn enabled(&self) -> Vec<String> {
        let known = KNOWN_PYLONS
            .iter()
            .filter(|name| self.is_enabled(name))
            .map(|name| name.to_string());
        let extra = self
            .0
            .iter()
            .filter(|(name, enabled)| **enabled && !KNOWN_PYLONS.contains(&name.as_str()))
            .map(|(name, _)| name.clone());
        known.chain(extra).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &bool)> {
        self.0.iter()
    }
}

impl FromIterator<(String, bool)> for Pylons {
    fn from_iter<T: IntoIterator<Item = (String, bool)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingsDisplay {
    pub show_balance: bool,
    pub show_level: bool,
}

impl Default for HoldingsDisplay {
    fn default() -> Self {
        Self {
            show_balance: true,
            show_level: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub wallet_address: String,
    pub display_name: String,
    #[serde(default)]
    pub bio: String,
    pub avatar_url: Option<String>,
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default)]
    pub badges: Vec<String>,
    #[serde(default)]
    pub social_links: BTreeMap<String, String>,
    #[serde(default)]
    pub holdings: HoldingsDisplay,
    #[serde(default)]
    pub pylons: Pylons,
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_theme() -> String {
    "void".to_string()
}

impl Profile {
    pub fn new(wallet_address: &str) -> Self {
        Self {
            wallet_address: wallet_address.to_string(),
            display_name: crate::models::short_wallet_name(wallet_address),
            bio: String::new(),
            avatar_url: None,
            theme: default_theme(),
            badges: Vec::new(),
            social_links: BTreeMap::new(),
            holdings: HoldingsDisplay::default(),
            pylons: Pylons::default(),
            updated_at: None,
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.display_name.trim().is_empty() {
            return Err(ModelError::Empty("display name"));
        }
        check_len("display name", &self.display_name, MAX_DISPLAY_NAME)?;
        check_len("bio", &self.bio, MAX_BIO)?;
        if self.badges.len() > MAX_BADGES {
            return Err(ModelError::TooLong {
                field: "badges",
                max: MAX_BADGES,
            });
        }
        if let Some(url) = &self.avatar_url {
            check_url(url)?;
        }
        for url in self.social_links.values() {
            check_url(url)?;
        }
        for (name, _) in self.pylons.iter() {
            if name.is_empty() {
                return Err(ModelError::Empty("pylon name"));
            }
            check_len("pylon name", name, MAX_PYLON_NAME)?;
        }
        Ok(())
    }
}
