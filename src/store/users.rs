/*!
`Store` methods for dealing with user rows.

```sql
CREATE TABLE users (
    id          BIGSERIAL PRIMARY KEY,
    name        TEXT NOT NULL,
    email       TEXT UNIQUE NOT NULL,
    pwhash      TEXT NOT NULL,
    role        TEXT NOT NULL,  /* one of { 'Admin', 'Teacher', 'Student' } */
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);
```
*/
use tokio_postgres::{error::SqlState, Row};

use super::{DbError, Store};
use crate::user::{Role, User};

fn user_from_row(row: &Row) -> Result<User, DbError> {
    let role_str: &str = row.try_get("role")?;
    let u = User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        role: role_str.parse()?,
        created_at: row.try_get("created_at")?,
        pwhash: row.try_get("pwhash")?,
    };

    Ok(u)
}

/// Outcome of attempting to insert a user.
#[derive(Debug)]
pub enum InsertUser {
    Created(User),
    DuplicateEmail,
}

/// Outcome of attempting to update a user.
#[derive(Debug)]
pub enum UpdateUser {
    Updated(User),
    DuplicateEmail,
    NoSuchUser,
}

/// Outcome of attempting to delete a user.
#[derive(Debug)]
pub enum DeleteUser {
    Deleted,
    /// Still referenced by a class, enrollment, attendance row, or leave
    /// request; the row stays put.
    InUse,
    NoSuchUser,
}

impl Store {
    pub async fn insert_user(
        &self,
        name: &str,
        email: &str,
        pwhash: &str,
        role: Role,
    ) -> Result<InsertUser, DbError> {
        log::trace!(
            "Store::insert_user( {:?}, {:?}, [ pwhash ], {} ) called.",
            name, email, role
        );

        let client = self.connect().await?;

        let res = client.query_one(
            "INSERT INTO users (name, email, pwhash, role)
                VALUES ($1, $2, $3, $4)
                RETURNING id, name, email, pwhash, role, created_at",
            &[&name, &email, &pwhash, &role.to_string()],
        ).await;

        match res {
            Ok(row) => Ok(InsertUser::Created(user_from_row(&row)?)),
            Err(e) => {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    log::trace!("    ...email {:?} already in use.", email);
                    Ok(InsertUser::DuplicateEmail)
                } else {
                    Err(DbError::from(e).annotate("Error inserting user"))
                }
            },
        }
    }

    pub async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, DbError> {
        log::trace!("Store::get_user_by_id( {} ) called.", id);

        let client = self.connect().await?;
        match client.query_opt(
            "SELECT id, name, email, pwhash, role, created_at
                FROM users WHERE id = $1",
            &[&id],
        ).await? {
            Some(row) => Ok(Some(user_from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        log::trace!("Store::get_user_by_email( {:?} ) called.", email);

        let client = self.connect().await?;
        match client.query_opt(
            "SELECT id, name, email, pwhash, role, created_at
                FROM users WHERE email = $1",
            &[&email],
        ).await? {
            Some(row) => Ok(Some(user_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// All users, newest first.
    pub async fn get_users(&self) -> Result<Vec<User>, DbError> {
        log::trace!("Store::get_users() called.");

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT id, name, email, pwhash, role, created_at
                FROM users ORDER BY created_at DESC",
            &[],
        ).await?;

        let mut users: Vec<User> = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            users.push(user_from_row(row)?);
        }

        Ok(users)
    }

    pub async fn update_user(
        &self,
        id: i64,
        name: &str,
        email: &str,
        role: Role,
    ) -> Result<UpdateUser, DbError> {
        log::trace!(
            "Store::update_user( {}, {:?}, {:?}, {} ) called.",
            id, name, email, role
        );

        let client = self.connect().await?;

        let res = client.query_opt(
            "UPDATE users SET name = $2, email = $3, role = $4
                WHERE id = $1
                RETURNING id, name, email, pwhash, role, created_at",
            &[&id, &name, &email, &role.to_string()],
        ).await;

        match res {
            Ok(Some(row)) => Ok(UpdateUser::Updated(user_from_row(&row)?)),
            Ok(None) => Ok(UpdateUser::NoSuchUser),
            Err(e) => {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    Ok(UpdateUser::DuplicateEmail)
                } else {
                    Err(DbError::from(e).annotate("Error updating user"))
                }
            },
        }
    }

    pub async fn delete_user(&self, id: i64) -> Result<DeleteUser, DbError> {
        log::trace!("Store::delete_user( {} ) called.", id);

        let client = self.connect().await?;

        match client.execute("DELETE FROM users WHERE id = $1", &[&id]).await {
            Ok(0) => Ok(DeleteUser::NoSuchUser),
            Ok(_) => Ok(DeleteUser::Deleted),
            Err(e) => {
                if e.code() == Some(&SqlState::FOREIGN_KEY_VIOLATION) {
                    log::trace!("    ...user {} still referenced; not deleting.", id);
                    Ok(DeleteUser::InUse)
                } else {
                    Err(DbError::from(e).annotate("Error deleting user"))
                }
            },
        }
    }

    /// Number of users holding `role`.
    pub async fn count_users_with_role(&self, role: Role) -> Result<i64, DbError> {
        log::trace!("Store::count_users_with_role( {} ) called.", role);

        let client = self.connect().await?;
        let row = client.query_one(
            "SELECT COUNT(*) FROM users WHERE role = $1",
            &[&role.to_string()],
        ).await?;

        Ok(row.try_get(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serial_test::serial;

    use crate::store::tests::TEST_CONNECTION;
    use crate::tests::ensure_logging;

    static STAFF: &[(&str, &str, &str)] = &[
        ("Thelma Grady", "thelma@rollcall.test", "Admin"),
        ("Mr Berro", "berro@rollcall.test", "Teacher"),
        ("Ms Jenny", "jenny@rollcall.test", "Teacher"),
        ("John Smith", "lil.j.smithy@rollcall.test", "Student"),
    ];

    #[tokio::test]
    #[ignore]
    #[serial]
    async fn user_crud() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        for (name, email, role) in STAFF.iter() {
            let role: Role = role.parse().unwrap();
            match db.insert_user(name, email, "x", role).await.unwrap() {
                InsertUser::Created(u) => {
                    assert_eq!((u.name.as_str(), u.email.as_str(), u.role), (*name, *email, role));
                },
                x => panic!("expected Created, got {:?}", &x),
            }
        }

        // A second user with an existing email must be refused.
        assert!(matches!(
            db.insert_user("Imposter", "thelma@rollcall.test", "x", Role::Student)
                .await
                .unwrap(),
            InsertUser::DuplicateEmail
        ));

        assert_eq!(db.get_users().await.unwrap().len(), STAFF.len());
        assert_eq!(db.count_users_with_role(Role::Teacher).await.unwrap(), 2);
        assert_eq!(db.count_users_with_role(Role::Student).await.unwrap(), 1);

        let u = db
            .get_user_by_email("berro@rollcall.test")
            .await
            .unwrap()
            .unwrap();
        match db
            .update_user(u.id, "Señor Berro", "berro@rollcall.test", Role::Teacher)
            .await
            .unwrap()
        {
            UpdateUser::Updated(u2) => assert_eq!(u2.name, "Señor Berro"),
            x => panic!("expected Updated, got {:?}", &x),
        }

        // Renaming onto someone else's email must be refused.
        assert!(matches!(
            db.update_user(u.id, "Mr Berro", "jenny@rollcall.test", Role::Teacher)
                .await
                .unwrap(),
            UpdateUser::DuplicateEmail
        ));

        assert!(matches!(db.delete_user(u.id).await.unwrap(), DeleteUser::Deleted));
        assert!(matches!(db.delete_user(u.id).await.unwrap(), DeleteUser::NoSuchUser));
        assert!(db.get_user_by_id(u.id).await.unwrap().is_none());

        db.nuke_database().await.unwrap();
    }
}
