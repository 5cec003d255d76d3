/// Database row types, one per SQLite table.
/// Distinct from archevault-types models to keep the DB layer independent;
/// JSON columns stay as raw text here.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub wallet_address: Option<String>,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub status: String,
    /// Comma-separated role tags.
    pub roles: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct RoomRow {
    pub id: String,
    pub name: String,
    pub is_private: bool,
    pub is_voice: bool,
    pub created_by: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct MemberRow {
    pub room_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub author_id: String,
    pub content: String,
    pub parent_id: Option<String>,
    pub thread_id: Option<String>,
    pub pinned: bool,
    pub deleted: bool,
    pub created_at: String,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReactionRow {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ProfileRow {
    pub wallet_address: String,
    pub display_name: String,
    pub bio: String,
    pub avatar_url: Option<String>,
    pub theme: String,
    /// JSON array of badge ids.
    pub badges: String,
    /// JSON object of link name -> url.
    pub social_links: String,
    pub show_balance: bool,
    pub show_level: bool,
    /// JSON object of pylon name -> enabled.
    pub pylons: String,
    pub updated_at: String,
}
