use crate::Database;
use crate::models::{MemberRow, MessageRow, ProfileRow, ReactionRow, RoomRow, UserRow};
use anyhow::Result;
use rusqlite::Connection;

const USER_COLUMNS: &str = "id, wallet_address, display_name, avatar_url, status, roles, created_at";
const ROOM_COLUMNS: &str = "id, name, is_private, is_voice, created_by, created_at";
const MESSAGE_COLUMNS: &str =
    "id, room_id, author_id, content, parent_id, thread_id, pinned, deleted, created_at, updated_at";

impl Database {
    // -- Users --

    /// Creates the user for `wallet` unless one exists. Returns the stored row
    /// and whether it was created by this call.
    pub fn upsert_wallet_user(
        &self,
        id: &str,
        wallet: &str,
        display_name: &str,
        created_at: &str,
    ) -> Result<(UserRow, bool)> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, wallet_address, display_name, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(wallet_address) DO NOTHING",
                (id, wallet, display_name, created_at),
            )?;
            let row = query_user(conn, "wallet_address", wallet)?
                .ok_or_else(|| anyhow::anyhow!("User vanished after upsert: {}", wallet))?;
            Ok((row, inserted == 1))
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_user_by_wallet(&self, wallet: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "wallet_address", wallet))
    }

    /// Applies the provided fields, leaving `None` ones untouched.
    pub fn update_user(
        &self,
        id: &str,
        display_name: Option<&str>,
        avatar_url: Option<&str>,
        status: Option<&str>,
    ) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET
                    display_name = COALESCE(?2, display_name),
                    avatar_url = COALESCE(?3, avatar_url),
                    status = COALESCE(?4, status)
                 WHERE id = ?1",
                rusqlite::params![id, display_name, avatar_url, status],
            )?;
            query_user(conn, "id", id)
        })
    }

    // -- Rooms --

    /// Inserts the room and makes the creator its first member.
    pub fn create_room(
        &self,
        id: &str,
        name: &str,
        is_private: bool,
        is_voice: bool,
        creator_id: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO rooms (id, name, is_private, is_voice, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, name, is_private, is_voice, creator_id, created_at],
            )?;
            tx.execute(
                "INSERT INTO room_members (room_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                (id, creator_id, created_at),
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_room(&self, id: &str) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM rooms WHERE id = ?1", ROOM_COLUMNS);
            conn.query_row(&sql, [id], room_from_row).optional()
        })
    }

    /// Public rooms plus private rooms the user belongs to, newest first.
    pub fn list_rooms_for_user(&self, user_id: &str) -> Result<Vec<RoomRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM rooms r
                 WHERE r.is_private = 0
                    OR EXISTS (SELECT 1 FROM room_members m WHERE m.room_id = r.id AND m.user_id = ?1)
                 ORDER BY r.created_at DESC, r.rowid DESC",
                ROOM_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], room_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns true if the user was not already a member.
    pub fn add_member(&self, room_id: &str, user_id: &str, joined_at: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO room_members (room_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                (room_id, user_id, joined_at),
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn remove_member(&self, room_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                (room_id, user_id),
            )?;
            Ok(removed == 1)
        })
    }

    pub fn is_member(&self, room_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                    (room_id, user_id),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Batch-fetch memberships for a set of rooms, in join order.
    pub fn get_members_for_rooms(&self, room_ids: &[String]) -> Result<Vec<MemberRow>> {
        if room_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT room_id, user_id FROM room_members WHERE room_id IN ({}) ORDER BY rowid",
                placeholders(room_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(room_ids), |row| {
                    Ok(MemberRow {
                        room_id: row.get(0)?,
                        user_id: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, row: &MessageRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, room_id, author_id, content, parent_id, thread_id, pinned, deleted, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    row.id,
                    row.room_id,
                    row.author_id,
                    row.content,
                    row.parent_id,
                    row.thread_id,
                    row.pinned,
                    row.deleted,
                    row.created_at,
                    row.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
            conn.query_row(&sql, [id], message_from_row).optional()
        })
    }

    /// Top-level messages of a room, newest first. `before` is a `created_at`
    /// cursor from a previous page.
    pub fn get_messages(
        &self,
        room_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE room_id = ?1 AND thread_id IS NULL AND (?3 IS NULL OR created_at < ?3)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![room_id, limit, before], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Replies in a thread, oldest first.
    pub fn get_thread_messages(&self, thread_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE thread_id = ?1 ORDER BY created_at ASC, rowid ASC",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([thread_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Most recent visible top-level message of a room.
    pub fn get_last_message(&self, room_id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE room_id = ?1 AND thread_id IS NULL AND deleted = 0
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT 1",
                MESSAGE_COLUMNS
            );
            conn.query_row(&sql, [room_id], message_from_row).optional()
        })
    }

    pub fn update_message_content(
        &self,
        id: &str,
        content: &str,
        updated_at: &str,
    ) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET content = ?2, updated_at = ?3 WHERE id = ?1 AND deleted = 0",
                (id, content, updated_at),
            )?;
            let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
            conn.query_row(&sql, [id], message_from_row).optional()
        })
    }

    pub fn set_pinned(&self, id: &str, pinned: bool, updated_at: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET pinned = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id, pinned, updated_at],
            )?;
            let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
            conn.query_row(&sql, [id], message_from_row).optional()
        })
    }

    /// Flags the message deleted, blanks its content and drops its reactions.
    pub fn soft_delete_message(&self, id: &str, updated_at: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE messages SET deleted = 1, content = '', updated_at = ?2 WHERE id = ?1 AND deleted = 0",
                (id, updated_at),
            )?;
            tx.execute("DELETE FROM reactions WHERE message_id = ?1", [id])?;
            tx.commit()?;
            Ok(changed == 1)
        })
    }

    // -- Reactions --

    /// Toggle a reaction: removes if exists, inserts if not.
    /// Returns whether it was added, plus the message's reactions afterwards.
    pub fn toggle_reaction(
        &self,
        id: &str,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<(bool, Vec<ReactionRow>)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                    rusqlite::params![message_id, user_id, emoji],
                    |row| row.get(0),
                )
                .optional()?;

            let added = match existing {
                Some(existing_id) => {
                    tx.execute("DELETE FROM reactions WHERE id = ?1", [&existing_id])?;
                    false
                }
                None => {
                    tx.execute(
                        "INSERT INTO reactions (id, message_id, user_id, emoji) VALUES (?1, ?2, ?3, ?4)",
                        rusqlite::params![id, message_id, user_id, emoji],
                    )?;
                    true
                }
            };

            let rows = query_reactions(&tx, std::slice::from_ref(&message_id.to_string()))?;
            tx.commit()?;
            Ok((added, rows))
        })
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn get_reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| query_reactions(conn, message_ids))
    }

    // -- Profiles --

    pub fn get_profile(&self, wallet: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT wallet_address, display_name, bio, avatar_url, theme, badges, social_links,
                        show_balance, show_level, pylons, updated_at
                 FROM profiles WHERE wallet_address = ?1",
                [wallet],
                |row| {
                    Ok(ProfileRow {
                        wallet_address: row.get(0)?,
                        display_name: row.get(1)?,
                        bio: row.get(2)?,
                        avatar_url: row.get(3)?,
                        theme: row.get(4)?,
                        badges: row.get(5)?,
                        social_links: row.get(6)?,
                        show_balance: row.get(7)?,
                        show_level: row.get(8)?,
                        pylons: row.get(9)?,
                        updated_at: row.get(10)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn upsert_profile(&self, row: &ProfileRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (wallet_address, display_name, bio, avatar_url, theme, badges,
                                       social_links, show_balance, show_level, pylons, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(wallet_address) DO UPDATE SET
                    display_name = excluded.display_name,
                    bio = excluded.bio,
                    avatar_url = excluded.avatar_url,
                    theme = excluded.theme,
                    badges = excluded.badges,
                    social_links = excluded.social_links,
                    show_balance = excluded.show_balance,
                    show_level = excluded.show_level,
                    pylons = excluded.pylons,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    row.wallet_address,
                    row.display_name,
                    row.bio,
                    row.avatar_url,
                    row.theme,
                    row.badges,
                    row.social_links,
                    row.show_balance,
                    row.show_level,
                    row.pylons,
                    row.updated_at,
                ],
            )?;
            Ok(())
        })
    }
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column);
    conn.query_row(&sql, [value], |row| {
        Ok(UserRow {
            id: row.get(0)?,
            wallet_address: row.get(1)?,
            display_name: row.get(2)?,
            avatar_url: row.get(3)?,
            status: row.get(4)?,
            roles: row.get(5)?,
            created_at: row.get(6)?,
        })
    })
    .optional()
}

fn query_reactions(conn: &Connection, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
    let sql = format!(
        "SELECT id, message_id, user_id, emoji, created_at FROM reactions
         WHERE message_id IN ({})
         ORDER BY created_at ASC, rowid ASC",
        placeholders(message_ids.len())
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(message_ids), |row| {
            Ok(ReactionRow {
                id: row.get(0)?,
                message_id: row.get(1)?,
                user_id: row.get(2)?,
                emoji: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn room_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RoomRow> {
    Ok(RoomRow {
        id: row.get(0)?,
        name: row.get(1)?,
        is_private: row.get(2)?,
        is_voice: row.get(3)?,
        created_by: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        room_id: row.get(1)?,
        author_id: row.get(2)?,
        content: row.get(3)?,
        parent_id: row.get(4)?,
        thread_id: row.get(5)?,
        pinned: row.get(6)?,
        deleted: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: &str = "2026-01-01T00:00:00.000Z";
    const T1: &str = "2026-01-01T00:00:01.000Z";

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.upsert_wallet_user("u1", "WalletOne", "Wall..tOne", T0).unwrap();
        db.upsert_wallet_user("u2", "WalletTwo", "Wall..tTwo", T0).unwrap();
        db
    }

    fn message(id: &str, room_id: &str, created_at: &str) -> MessageRow {
        MessageRow {
            id: id.into(),
            room_id: room_id.into(),
            author_id: "u1".into(),
            content: format!("content of {}", id),
            parent_id: None,
            thread_id: None,
            pinned: false,
            deleted: false,
            created_at: created_at.into(),
            updated_at: None,
        }
    }

    #[test]
    fn wallet_upsert_is_idempotent() {
        let db = seeded();
        let (row, created) = db
            .upsert_wallet_user("other-id", "WalletOne", "ignored", T1)
            .unwrap();
        assert!(!created);
        assert_eq!(row.id, "u1");
        assert_eq!(row.display_name, "Wall..tOne");
    }

    #[test]
    fn toggle_twice_is_a_noop() {
        let db = seeded();
        db.insert_message(&message("m1", crate::GENERAL_ROOM_ID, T0)).unwrap();

        let (added, rows) = db.toggle_reaction("r1", "m1", "u1", "🔥").unwrap();
        assert!(added);
        assert_eq!(rows.len(), 1);

        let (added, rows) = db.toggle_reaction("r2", "m1", "u1", "🔥").unwrap();
        assert!(!added);
        assert!(rows.is_empty());
    }

    #[test]
    fn two_users_same_emoji() {
        let db = seeded();
        db.insert_message(&message("m1", crate::GENERAL_ROOM_ID, T0)).unwrap();

        db.toggle_reaction("r1", "m1", "u1", "🔥").unwrap();
        let (_, rows) = db.toggle_reaction("r2", "m1", "u2", "🔥").unwrap();

        let users: Vec<&str> = rows.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(users, vec!["u1", "u2"]);
    }

    #[test]
    fn private_rooms_only_listed_for_members() {
        let db = seeded();
        db.create_room("secret", "secret", true, false, "u1", T1).unwrap();

        let for_u1: Vec<String> = db.list_rooms_for_user("u1").unwrap().into_iter().map(|r| r.id).collect();
        let for_u2: Vec<String> = db.list_rooms_for_user("u2").unwrap().into_iter().map(|r| r.id).collect();

        assert!(for_u1.contains(&"secret".to_string()));
        assert!(!for_u2.contains(&"secret".to_string()));
        assert!(for_u2.contains(&crate::GENERAL_ROOM_ID.to_string()));

        assert!(db.add_member("secret", "u2", T1).unwrap());
        assert!(!db.add_member("secret", "u2", T1).unwrap());
        let members = db.get_members_for_rooms(&["secret".to_string()]).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].user_id, "u1");
    }

    #[test]
    fn history_excludes_thread_replies_and_pages_by_cursor() {
        let db = seeded();
        let room = crate::GENERAL_ROOM_ID;
        db.insert_message(&message("m1", room, T0)).unwrap();
        db.insert_message(&message("m2", room, T1)).unwrap();
        let mut reply = message("m3", room, "2026-01-01T00:00:02.000Z");
        reply.thread_id = Some("m1".into());
        db.insert_message(&reply).unwrap();

        let page = db.get_messages(room, 50, None).unwrap();
        let ids: Vec<&str> = page.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m1"]);

        let older = db.get_messages(room, 50, Some(T1)).unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].id, "m1");

        assert_eq!(db.get_thread_messages("m1").unwrap().len(), 1);
        assert_eq!(db.get_last_message(room).unwrap().unwrap().id, "m2");
    }

    #[test]
    fn soft_delete_keeps_row() {
        let db = seeded();
        db.insert_message(&message("m1", crate::GENERAL_ROOM_ID, T0)).unwrap();
        db.toggle_reaction("r1", "m1", "u1", "🔥").unwrap();

        assert!(db.soft_delete_message("m1", T1).unwrap());
        assert!(!db.soft_delete_message("m1", T1).unwrap());

        let row = db.get_message("m1").unwrap().unwrap();
        assert!(row.deleted);
        assert!(row.content.is_empty());
        assert!(db.get_reactions_for_messages(&["m1".into()]).unwrap().is_empty());
    }

    #[test]
    fn profile_upsert_overwrites() {
        let db = seeded();
        let mut row = ProfileRow {
            wallet_address: "WalletOne".into(),
            display_name: "one".into(),
            bio: String::new(),
            avatar_url: None,
            theme: "void".into(),
            badges: "[]".into(),
            social_links: "{}".into(),
            show_balance: true,
            show_level: true,
            pylons: r#"{"show_aetherFeed":true}"#.into(),
            updated_at: T0.into(),
        };
        db.upsert_profile(&row).unwrap();

        row.pylons = r#"{"show_aetherFeed":false}"#.into();
        row.updated_at = T1.into();
        db.upsert_profile(&row).unwrap();

        let stored = db.get_profile("WalletOne").unwrap().unwrap();
        assert_eq!(stored.pylons, r#"{"show_aetherFeed":false}"#);
        assert_eq!(stored.updated_at, T1);
    }

    #[test]
    fn file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archevault.db");
        {
            let db = Database::open(&path).unwrap();
            db.upsert_wallet_user("u1", "WalletOne", "one", T0).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert!(db.get_user_by_wallet("WalletOne").unwrap().is_some());
    }
}
