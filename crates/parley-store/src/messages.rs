use std::collections::HashMap;

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use parley_shared::{Message, MessageId, UserId};

use crate::database::{format_ts, parse_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::NewMessage;

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, text, image, seen, created_at";

impl Database {
    /// Persist a new message and return the stored record.
    ///
    /// Fails with [`StoreError::Constraint`] if either participant does not
    /// exist. Callers must not route a message before this returns `Ok`.
    pub fn create_message(&self, new: &NewMessage) -> Result<Message> {
        let message = Message {
            id: MessageId::new(),
            sender_id: new.sender_id.clone(),
            receiver_id: new.receiver_id.clone(),
            text: new.text.clone(),
            image: new.image.clone(),
            seen: false,
            created_at: Utc::now(),
        };

        self.conn()
            .execute(
                "INSERT INTO messages (id, sender_id, receiver_id, text, image, seen, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                params![
                    message.id.to_string(),
                    message.sender_id.as_str(),
                    message.receiver_id.as_str(),
                    message.text,
                    message.image,
                    format_ts(&message.created_at),
                ],
            )
            .map_err(StoreError::from_query)?;

        Ok(message)
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(StoreError::from_query)
    }

    /// Every message exchanged between `a` and `b`, oldest first.
    pub fn conversation(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY created_at ASC, rowid ASC"
        ))?;

        let rows = stmt.query_map(params![a.as_str(), b.as_str()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Number of messages from `from` to `to` not yet marked seen.
    pub fn count_unseen(&self, from: &UserId, to: &UserId) -> Result<u32> {
        let count: u32 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE sender_id = ?1 AND receiver_id = ?2 AND seen = 0",
            params![from.as_str(), to.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Unseen counts for `to`, keyed by sender. Senders with nothing unseen
    /// are absent from the map.
    pub fn unseen_counts_for(&self, to: &UserId) -> Result<HashMap<UserId, u32>> {
        let mut stmt = self.conn().prepare(
            "SELECT sender_id, COUNT(*)
             FROM messages
             WHERE receiver_id = ?1 AND seen = 0
             GROUP BY sender_id",
        )?;

        let rows = stmt.query_map(params![to.as_str()], |row| {
            Ok((UserId(row.get(0)?), row.get::<_, u32>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (sender, count) = row?;
            counts.insert(sender, count);
        }
        Ok(counts)
    }

    /// Mark a single message seen. Returns `false` if no such message.
    pub fn mark_message_seen(&self, id: MessageId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET seen = 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Mark every message from `from` to `to` seen. Returns how many changed.
    pub fn mark_conversation_seen(&self, from: &UserId, to: &UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE messages SET seen = 1 WHERE sender_id = ?1 AND receiver_id = ?2 AND seen = 0",
            params![from.as_str(), to.as_str()],
        )?;
        Ok(affected)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let ts_str: String = row.get(6)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Message {
        id: MessageId(id),
        sender_id: UserId(row.get(1)?),
        receiver_id: UserId(row.get(2)?),
        text: row.get(3)?,
        image: row.get(4)?,
        seen: row.get::<_, i64>(5)? != 0,
        created_at: parse_ts(6, &ts_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;

    fn setup() -> (Database, UserId, UserId) {
        let db = Database::open_in_memory().unwrap();
        let mut ids = Vec::new();
        for (name, email) in [("Alice", "a@example.com"), ("Bob", "b@example.com")] {
            let user = db
                .create_user(&NewUser {
                    full_name: name.into(),
                    email: email.into(),
                    password_hash: "x".into(),
                    bio: String::new(),
                })
                .unwrap();
            ids.push(user.id);
        }
        let bob = ids.pop().unwrap();
        let alice = ids.pop().unwrap();
        (db, alice, bob)
    }

    fn text(from: &UserId, to: &UserId, body: &str) -> NewMessage {
        NewMessage {
            sender_id: from.clone(),
            receiver_id: to.clone(),
            text: Some(body.into()),
            image: None,
        }
    }

    #[test]
    fn conversation_is_ordered_and_symmetric() {
        let (db, alice, bob) = setup();
        let m1 = db.create_message(&text(&alice, &bob, "one")).unwrap();
        let m2 = db.create_message(&text(&bob, &alice, "two")).unwrap();
        let m3 = db.create_message(&text(&alice, &bob, "three")).unwrap();

        let forward = db.conversation(&alice, &bob).unwrap();
        let backward = db.conversation(&bob, &alice).unwrap();
        assert_eq!(forward, vec![m1, m2, m3]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn stored_record_matches_returned_record() {
        let (db, alice, bob) = setup();
        let created = db.create_message(&text(&alice, &bob, "hi")).unwrap();
        assert_eq!(db.get_message(created.id).unwrap(), created);
        assert!(!created.seen);
    }

    #[test]
    fn unknown_receiver_is_rejected() {
        let (db, alice, _bob) = setup();
        let err = db
            .create_message(&text(&alice, &UserId::from("ghost"), "hello?"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[test]
    fn unseen_counts_and_marking() {
        let (db, alice, bob) = setup();
        let m1 = db.create_message(&text(&alice, &bob, "1")).unwrap();
        db.create_message(&text(&alice, &bob, "2")).unwrap();
        db.create_message(&text(&bob, &alice, "reply")).unwrap();

        assert_eq!(db.count_unseen(&alice, &bob).unwrap(), 2);
        assert_eq!(db.count_unseen(&bob, &alice).unwrap(), 1);

        let counts = db.unseen_counts_for(&bob).unwrap();
        assert_eq!(counts.get(&alice), Some(&2));
        assert_eq!(counts.len(), 1);

        assert!(db.mark_message_seen(m1.id).unwrap());
        assert_eq!(db.count_unseen(&alice, &bob).unwrap(), 1);

        assert_eq!(db.mark_conversation_seen(&alice, &bob).unwrap(), 1);
        assert!(db.unseen_counts_for(&bob).unwrap().is_empty());
        assert!(!db.mark_message_seen(MessageId::new()).unwrap());
    }
}
