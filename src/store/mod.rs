/*!
Database interaction module.

The Postgres database to which this connects holds the whole authoritative
state of the system: users, classes, enrollments, attendance rows, leave
requests, and issued QR check-in tokens. The application keeps nothing in
memory between requests.

Submodules group the `Store` methods by concern:

  * `users` — user rows and role counts,
  * `classes` — classes, enrollments, schedules,
  * `attendance` — the check-in decision, manual marks, history, QR tokens,
  * `leaves` — leave requests and their review transitions.
*/
use std::fmt::Write;

use tokio_postgres::{Client, NoTls};

pub mod attendance;
pub mod classes;
pub mod leaves;
pub mod users;

pub use attendance::{classify_check_in, attendance_rate, AttendanceStatus, CheckIn};
pub use leaves::{LeaveStatus, Review};

static SCHEMA: &[(&str, &str, &str)] = &[
    (
        "SELECT FROM information_schema.tables WHERE table_name = 'users'",
        "CREATE TABLE users (
            id          BIGSERIAL PRIMARY KEY,
            name        TEXT NOT NULL,
            email       TEXT UNIQUE NOT NULL,
            pwhash      TEXT NOT NULL,
            role        TEXT NOT NULL,  /* one of { 'Admin', 'Teacher', 'Student' } */
            created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        "DROP TABLE users",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'classes'",
        "CREATE TABLE classes (
            id          BIGSERIAL PRIMARY KEY,
            name        TEXT NOT NULL,
            weekday     TEXT NOT NULL,  /* 'Monday' ... 'Sunday' */
            start_time  TEXT NOT NULL,  /* 'HH:MM', server-local */
            teacher_id  BIGINT NOT NULL REFERENCES users(id)
        )",
        "DROP TABLE classes",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'enrollments'",
        "CREATE TABLE enrollments (
            class_id    BIGINT NOT NULL REFERENCES classes(id),
            student_id  BIGINT NOT NULL REFERENCES users(id),
            UNIQUE(class_id, student_id)
        )",
        "DROP TABLE enrollments",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'attendance'",
        "CREATE TABLE attendance (
            id          BIGSERIAL PRIMARY KEY,
            class_id    BIGINT NOT NULL REFERENCES classes(id),
            student_id  BIGINT NOT NULL REFERENCES users(id),
            taken_at    TIMESTAMPTZ NOT NULL,
            taken_on    DATE NOT NULL,  /* server-local calendar day of taken_at */
            status      TEXT NOT NULL,  /* 'Present' | 'Late' | 'Absent' | 'OnLeave' */
            UNIQUE(class_id, student_id, taken_on)
        )",
        "DROP TABLE attendance",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'leave_requests'",
        "CREATE TABLE leave_requests (
            id          BIGSERIAL PRIMARY KEY,
            student_id  BIGINT NOT NULL REFERENCES users(id),
            from_day    DATE NOT NULL,
            to_day      DATE NOT NULL,
            reason      TEXT NOT NULL,
            status      TEXT NOT NULL DEFAULT 'Pending',
            reviewed_by BIGINT REFERENCES users(id),
            reviewed_at TIMESTAMPTZ
        )",
        "DROP TABLE leave_requests",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'qr_tokens'",
        "CREATE TABLE qr_tokens (
            token       TEXT PRIMARY KEY,
            class_id    BIGINT NOT NULL REFERENCES classes(id),
            issued_at   TIMESTAMPTZ NOT NULL,
            expires_at  TIMESTAMPTZ NOT NULL
        )",
        "DROP TABLE qr_tokens",
    ),
];

#[derive(Debug, PartialEq)]
pub struct DbError(String);

impl DbError {
    /// Prepend some contextual `annotation` for the error.
    fn annotate(self, annotation: &str) -> Self {
        let s = format!("{}: {}", annotation, &self.0);
        Self(s)
    }

    pub fn display(&self) -> &str { &self.0 }
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", &self.0)
    }
}

impl From<tokio_postgres::error::Error> for DbError {
    fn from(e: tokio_postgres::error::Error) -> DbError {
        let mut s = format!("Data DB: {}", &e);
        if let Some(dbe) = e.as_db_error() {
            write!(&mut s, "; {}", dbe).unwrap();
        }
        DbError(s)
    }
}

impl From<String> for DbError {
    fn from(s: String) -> DbError { DbError(s) }
}

pub struct Store {
    connection_string: String,
}

impl Store {
    pub fn new(connection_string: String) -> Self {
        log::trace!("Store::new( {:?} ) called.", &connection_string);

        Self { connection_string }
    }

    async fn connect(&self) -> Result<Client, DbError> {
        log::trace!(
            "Store::connect() called w/connection string {:?}",
            &self.connection_string
        );

        match tokio_postgres::connect(&self.connection_string, NoTls).await {
            Ok((client, connection)) => {
                log::trace!("    ...connection successful.");
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        log::error!("Data DB connection error: {}", &e);
                    } else {
                        log::trace!("tokio connection runtime drops.");
                    }
                });
                Ok(client)
            },
            Err(e) => {
                let dberr = DbError::from(e);
                log::trace!("    ...connection failed: {:?}", &dberr);
                Err(dberr.annotate("Unable to connect"))
            },
        }
    }

    pub async fn ensure_db_schema(&self) -> Result<(), DbError> {
        log::trace!("Store::ensure_db_schema() called.");

        let mut client = self.connect().await?;
        let t = client.transaction().await
            .map_err(|e| DbError::from(e)
                .annotate("Data DB unable to begin transaction"))?;

        for (test_stmt, create_stmt, _) in SCHEMA.iter() {
            if t.query_opt(test_stmt.to_owned(), &[]).await?.is_none() {
                log::info!(
                    "{:?} returned no results; attempting to insert table.",
                    test_stmt
                );
                t.execute(create_stmt.to_owned(), &[]).await?;
            }
        }

        t.commit().await
            .map_err(|e| DbError::from(e)
                .annotate("Error committing transaction"))
    }

    /**
    Drop all database tables to fully reset database state.

    This is only meant for cleanup after testing. It is advisable to look at
    the ERROR level log output when testing to ensure this method did its job.
    */
    #[cfg(test)]
    pub async fn nuke_database(&self) -> Result<(), DbError> {
        log::trace!("Store::nuke_database() called.");

        let client = self.connect().await?;

        for (_, _, drop_stmt) in SCHEMA.iter().rev() {
            if let Err(e) = client.execute(drop_stmt.to_owned(), &[]).await {
                let err = DbError::from(e);
                log::error!("Error dropping: {:?}: {}", &drop_stmt, &err.display());
            }
        }

        log::trace!("    ...nuking complete.");
        Ok(())
    }
}

#[cfg(test)]
pub mod tests {
    /*!
    These tests assume you have a Postgres instance running on your local
    machine with resources named according to what you see in the
    `static TEST_CONNECTION &str`:

    ```text
    user: rollcall_test
    password: rollcall_test

    with write access to:

    database: rollcall_test
    ```

    They are `#[ignore]`d so the suite passes where no such instance exists;
    run them with `cargo test -- --ignored` on a provisioned machine.
    */
    use super::*;
    use crate::tests::ensure_logging;

    use serial_test::serial;

    pub static TEST_CONNECTION: &str =
        "host=localhost user=rollcall_test password='rollcall_test' dbname=rollcall_test";

    /**
    This function is for getting the database back in a blank slate state if
    a test panics partway through and leaves it munged.

    ```bash
    cargo test reset_store -- --ignored
    ```
    */
    #[tokio::test]
    #[ignore]
    #[serial]
    async fn reset_store() {
        ensure_logging();
        let db = Store::new(TEST_CONNECTION.to_owned());
        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    #[serial]
    async fn create_store() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();
        db.nuke_database().await.unwrap();
    }
}
