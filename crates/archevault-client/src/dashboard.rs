//! Dashboard shell: where a signed-in wallet lands and which pylons show.

use std::collections::BTreeMap;

use archevault_types::profile::Profile;

use crate::session::SessionState;

#[derive(Debug, Clone, PartialEq)]
pub enum Landing {
    /// No wallet session; show the connect screen.
    Connect,
    /// Still re-deriving the session.
    Loading,
    /// Signed in but no EON-ID profile yet.
    Setup,
    Dashboard,
}

pub fn landing(session: &SessionState, profile: Option<&Profile>) -> Landing {
    match (session, profile) {
        (SessionState::Unauthenticated, _) => Landing::Connect,
        (SessionState::Checking, _) => Landing::Loading,
        (SessionState::Authenticated(_), None) => Landing::Setup,
        (SessionState::Authenticated(_), Some(_)) => Landing::Dashboard,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Widget {
    RefraGate,
    AetherFeed,
    Holdings {
        balance: Option<f64>,
        level: Option<u8>,
    },
    Chat,
    Badges(Vec<String>),
    Socials(BTreeMap<String, String>),
    /// A pylon this build does not know how to render.
    Other(String),
}

/// Token holdings as measured at sign-in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Holdings {
    pub balance: f64,
    pub level: u8,
}

/// Widgets for the enabled pylons, in display order. Holdings respect the
/// profile's balance and level visibility toggles.
pub fn widgets(profile: &Profile, holdings: Holdings) -> Vec<Widget> {
    profile
        .pylons
        .enabled()
        .into_iter()
        .map(|name| match name.as_str() {
            "show_refraGate" => Widget::RefraGate,
            "show_aetherFeed" => Widget::AetherFeed,
            "show_holdings" => Widget::Holdings {
                balance: profile.holdings.show_balance.then_some(holdings.balance),
                level: profile.holdings.show_level.then_some(holdings.level),
            },
            "show_chat" => Widget::Chat,
            "show_badges" => Widget::Badges(profile.badges.clone()),
            "show_socials" => Widget::Socials(profile.social_links.clone()),
            _ => Widget::Other(name),
        })
        .collect()
}

/// Flips one pylon and returns the updated profile, ready to be saved.
pub fn toggle_pylon(profile: &Profile, name: &str) -> Profile {
    let mut next = profile.clone();
    let enabled = next.pylons.is_enabled(name);
    next.pylons.set(name, !enabled);
    next
}
