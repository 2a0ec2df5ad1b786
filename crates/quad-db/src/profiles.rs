use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use quad_types::models::Profile;

use crate::models::{PROFILE_COLUMNS, profile_from_row, ts};
use crate::{ChatResult, Database};

impl Database {
    /// Insert or refresh the local mirror of a user's identity.
    pub fn upsert_profile(&self, profile: &Profile, now: DateTime<Utc>) -> ChatResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (user_id, display_name, avatar_url, campus, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                    display_name = excluded.display_name,
                    avatar_url = excluded.avatar_url,
                    campus = excluded.campus,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    profile.user_id.to_string(),
                    profile.display_name,
                    profile.avatar_url,
                    profile.campus,
                    ts(now),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_profile(&self, user_id: Uuid) -> ChatResult<Option<Profile>> {
        self.with_conn(|conn| query_profile(conn, user_id))
    }
}

pub(crate) fn query_profile(conn: &Connection, user_id: Uuid) -> ChatResult<Option<Profile>> {
    let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id = ?1");
    let profile = conn
        .query_row(&sql, [user_id.to_string()], profile_from_row)
        .optional()?;
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_overwrites_campus_and_name() {
        let db = Database::open_in_memory().unwrap();
        let user_id = Uuid::new_v4();
        let mut profile = Profile {
            user_id,
            display_name: "Ada".into(),
            avatar_url: None,
            campus: "north".into(),
        };
        db.upsert_profile(&profile, Utc::now()).unwrap();

        profile.display_name = "Ada L.".into();
        profile.campus = "south".into();
        db.upsert_profile(&profile, Utc::now()).unwrap();

        assert_eq!(db.get_profile(user_id).unwrap(), Some(profile));
        assert_eq!(db.get_profile(Uuid::new_v4()).unwrap(), None);
    }
}
