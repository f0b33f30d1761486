//! CRUD operations for [`UserRecord`] accounts.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use parley_shared::UserId;

use crate::database::{format_ts, parse_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::{NewUser, ProfileUpdate, UserRecord};

const USER_COLUMNS: &str =
    "id, full_name, email, password_hash, bio, profile_picture, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new account and return it. The email is lower-cased; a
    /// duplicate yields [`StoreError::Constraint`].
    pub fn create_user(&self, new: &NewUser) -> Result<UserRecord> {
        let record = UserRecord {
            id: UserId(Uuid::new_v4().to_string()),
            full_name: new.full_name.clone(),
            email: new.email.trim().to_lowercase(),
            password_hash: new.password_hash.clone(),
            bio: new.bio.clone(),
            profile_picture: String::new(),
            created_at: Utc::now(),
        };

        self.conn()
            .execute(
                "INSERT INTO users (id, full_name, email, password_hash, bio, profile_picture, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id.as_str(),
                    record.full_name,
                    record.email,
                    record.password_hash,
                    record.bio,
                    record.profile_picture,
                    format_ts(&record.created_at),
                ],
            )
            .map_err(StoreError::from_query)?;

        tracing::debug!(user = %record.id, "created user");
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_user(&self, id: &UserId) -> Result<UserRecord> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.as_str()],
                row_to_user,
            )
            .map_err(StoreError::from_query)
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email.trim().to_lowercase()],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn user_exists(&self, id: &UserId) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM users WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// All accounts except `id`, ordered by name.
    pub fn list_users_except(&self, id: &UserId) -> Result<Vec<UserRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id != ?1 ORDER BY full_name COLLATE NOCASE, id"
        ))?;

        let rows = stmt.query_map(params![id.as_str()], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Apply a partial profile update and return the updated record.
    pub fn update_profile(&self, id: &UserId, update: &ProfileUpdate) -> Result<UserRecord> {
        let affected = self.conn().execute(
            "UPDATE users SET
                full_name       = COALESCE(?2, full_name),
                bio             = COALESCE(?3, bio),
                profile_picture = COALESCE(?4, profile_picture)
             WHERE id = ?1",
            params![
                id.as_str(),
                update.full_name,
                update.bio,
                update.profile_picture,
            ],
        )?;

        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_user(id)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    let created_str: String = row.get(6)?;
    Ok(UserRecord {
        id: UserId(row.get(0)?),
        full_name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        bio: row.get(4)?,
        profile_picture: row.get(5)?,
        created_at: parse_ts(6, &created_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(name: &str, email: &str) -> NewUser {
        NewUser {
            full_name: name.to_string(),
            email: email.to_string(),
            password_hash: "$argon2id$stub".to_string(),
            bio: "hello".to_string(),
        }
    }

    #[test]
    fn create_and_fetch_user() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user(&new_user("Alice", "Alice@Example.com")).unwrap();

        assert_eq!(alice.email, "alice@example.com");
        assert_eq!(db.get_user(&alice.id).unwrap(), alice);
        assert_eq!(
            db.find_user_by_email(" ALICE@example.com ").unwrap(),
            Some(alice.clone())
        );
        assert!(db.user_exists(&alice.id).unwrap());
        assert!(!db.user_exists(&UserId::from("nobody")).unwrap());
    }

    #[test]
    fn duplicate_email_is_a_constraint_error() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&new_user("Alice", "a@example.com")).unwrap();
        let err = db.create_user(&new_user("Other", "A@example.com")).unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[test]
    fn list_excludes_caller() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user(&new_user("Alice", "a@example.com")).unwrap();
        let bob = db.create_user(&new_user("bob", "b@example.com")).unwrap();
        let carol = db.create_user(&new_user("Carol", "c@example.com")).unwrap();

        let others = db.list_users_except(&alice.id).unwrap();
        let ids: Vec<_> = others.iter().map(|u| u.id.clone()).collect();
        assert_eq!(ids, vec![bob.id, carol.id]);
    }

    #[test]
    fn partial_profile_update() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user(&new_user("Alice", "a@example.com")).unwrap();

        let updated = db
            .update_profile(
                &alice.id,
                &ProfileUpdate {
                    bio: Some("new bio".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.full_name, "Alice");
        assert_eq!(updated.bio, "new bio");

        let missing = db.update_profile(&UserId::from("ghost"), &ProfileUpdate::default());
        assert!(matches!(missing, Err(StoreError::NotFound)));
    }
}
