/*!
`Store` methods for classes, enrollments, and schedules.

```sql
CREATE TABLE classes (
    id          BIGSERIAL PRIMARY KEY,
    name        TEXT NOT NULL,
    weekday     TEXT NOT NULL,  /* 'Monday' ... 'Sunday' */
    start_time  TEXT NOT NULL,  /* 'HH:MM', server-local */
    teacher_id  BIGINT NOT NULL REFERENCES users(id)
);

CREATE TABLE enrollments (
    class_id    BIGINT NOT NULL REFERENCES classes(id),
    student_id  BIGINT NOT NULL REFERENCES users(id),
    UNIQUE(class_id, student_id)
);
```

Enrollment is idempotent: re-enrolling an already-enrolled student is a
no-op, and the reported count only covers rows actually inserted.
*/
use std::collections::HashMap;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio_postgres::{types::Type, Row};

use super::{DbError, Store};
use crate::user::Role;

#[derive(Clone, Debug, Serialize)]
pub struct Class {
    pub id: i64,
    pub name: String,
    pub weekday: String,
    pub start_time: String,
    pub teacher_id: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct RosterStudent {
    pub id: i64,
    pub name: String,
    pub email: String,
}

/// A class with its teacher's identity and enrolled students attached,
/// as the admin and teacher dashboards want it.
#[derive(Debug, Serialize)]
pub struct ClassDetail {
    #[serde(flatten)]
    pub class: Class,
    pub teacher_name: String,
    pub teacher_email: String,
    pub students: Vec<RosterStudent>,
}

/// One entry of a student's schedule.
#[derive(Debug, Serialize)]
pub struct ScheduleEntry {
    pub class_id: i64,
    pub class_name: String,
    pub weekday: String,
    pub start_time: String,
    pub teacher_name: String,
    pub teacher_email: String,
}

#[derive(Debug)]
pub enum InsertClass {
    Created(Class),
    /// The given teacher id doesn't exist or doesn't belong to a Teacher.
    NoSuchTeacher,
}

#[derive(Debug)]
pub enum Enroll {
    /// Number of enrollments actually inserted (duplicates skipped).
    Enrolled(usize),
    NoSuchClass,
    /// At least one of the given ids doesn't refer to a user.
    NoSuchStudent,
}

fn class_from_row(row: &Row) -> Result<Class, DbError> {
    Ok(Class {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        weekday: row.try_get("weekday")?,
        start_time: row.try_get("start_time")?,
        teacher_id: row.try_get("teacher_id")?,
    })
}

impl Store {
    pub async fn insert_class(
        &self,
        name: &str,
        weekday: &str,
        start_time: &str,
        teacher_id: i64,
    ) -> Result<InsertClass, DbError> {
        log::trace!(
            "Store::insert_class( {:?}, {:?}, {:?}, {} ) called.",
            name, weekday, start_time, teacher_id
        );

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let teacher_ok = t.query_opt(
            "SELECT 1 FROM users WHERE id = $1 AND role = $2",
            &[&teacher_id, &Role::Teacher.to_string()],
        ).await?.is_some();
        if !teacher_ok {
            return Ok(InsertClass::NoSuchTeacher);
        }

        let row = t.query_one(
            "INSERT INTO classes (name, weekday, start_time, teacher_id)
                VALUES ($1, $2, $3, $4)
                RETURNING id, name, weekday, start_time, teacher_id",
            &[&name, &weekday, &start_time, &teacher_id],
        ).await?;

        t.commit().await?;
        Ok(InsertClass::Created(class_from_row(&row)?))
    }

    /// The `users.id` of the teacher who owns `class_id`, if the class
    /// exists. Handlers use this for ownership checks.
    pub async fn class_teacher(&self, class_id: i64) -> Result<Option<i64>, DbError> {
        log::trace!("Store::class_teacher( {} ) called.", class_id);

        let client = self.connect().await?;
        match client.query_opt(
            "SELECT teacher_id FROM classes WHERE id = $1",
            &[&class_id],
        ).await? {
            Some(row) => Ok(Some(row.try_get("teacher_id")?)),
            None => Ok(None),
        }
    }

    /// All classes with teachers and rosters attached.
    pub async fn get_classes(&self) -> Result<Vec<ClassDetail>, DbError> {
        log::trace!("Store::get_classes() called.");

        self.class_details("", &[]).await
    }

    /// The classes owned by `teacher_id`, rosters attached.
    pub async fn classes_for_teacher(&self, teacher_id: i64) -> Result<Vec<ClassDetail>, DbError> {
        log::trace!("Store::classes_for_teacher( {} ) called.", teacher_id);

        self.class_details("WHERE c.teacher_id = $1", &[&teacher_id]).await
    }

    async fn class_details(
        &self,
        filter: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Vec<ClassDetail>, DbError> {
        let client = self.connect().await?;

        let class_query = format!(
            "SELECT c.id, c.name, c.weekday, c.start_time, c.teacher_id,
                    u.name AS teacher_name, u.email AS teacher_email
                FROM classes c JOIN users u ON u.id = c.teacher_id
                {} ORDER BY c.id",
            filter
        );
        let roster_query = format!(
            "SELECT e.class_id, u.id, u.name, u.email
                FROM enrollments e
                JOIN users u ON u.id = e.student_id
                JOIN classes c ON c.id = e.class_id
                {} ORDER BY u.name",
            filter
        );

        let (class_rows, roster_rows) = tokio::join!(
            client.query(&class_query, params),
            client.query(&roster_query, params),
        );
        let (class_rows, roster_rows) = (class_rows?, roster_rows?);

        let mut rosters: HashMap<i64, Vec<RosterStudent>> = HashMap::new();
        for row in roster_rows.iter() {
            let class_id: i64 = row.try_get("class_id")?;
            rosters.entry(class_id).or_default().push(RosterStudent {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                email: row.try_get("email")?,
            });
        }

        let mut details: Vec<ClassDetail> = Vec::with_capacity(class_rows.len());
        for row in class_rows.iter() {
            let class = class_from_row(row)?;
            let students = rosters.remove(&class.id).unwrap_or_default();
            details.push(ClassDetail {
                class,
                teacher_name: row.try_get("teacher_name")?,
                teacher_email: row.try_get("teacher_email")?,
                students,
            });
        }

        Ok(details)
    }

    /// Enroll each of `student_ids` in `class_id`, skipping pairs that
    /// already exist.
    pub async fn enroll_students(
        &self,
        class_id: i64,
        student_ids: &[i64],
    ) -> Result<Enroll, DbError> {
        log::trace!(
            "Store::enroll_students( {}, [ {} students ] ) called.",
            class_id, student_ids.len()
        );

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        if t.query_opt("SELECT 1 FROM classes WHERE id = $1", &[&class_id])
            .await?
            .is_none()
        {
            return Ok(Enroll::NoSuchClass);
        }

        let insert_stmt = t.prepare_typed(
            "INSERT INTO enrollments (class_id, student_id)
                VALUES ($1, $2)
                ON CONFLICT (class_id, student_id) DO NOTHING",
            &[Type::INT8, Type::INT8],
        ).await?;

        let mut n_inserted: u64 = 0;
        {
            let params: Vec<[&(dyn tokio_postgres::types::ToSql + Sync); 2]> =
                student_ids.iter()
                    .map(|student_id| [
                        &class_id as &(dyn tokio_postgres::types::ToSql + Sync),
                        student_id as &(dyn tokio_postgres::types::ToSql + Sync),
                    ])
                    .collect();
            let mut inserts = FuturesUnordered::new();
            for p in params.iter() {
                inserts.push(t.execute(&insert_stmt, p));
            }

            while let Some(res) = inserts.next().await {
                match res {
                    Ok(n) => { n_inserted += n; },
                    Err(e) => {
                        if e.code() == Some(&tokio_postgres::error::SqlState::FOREIGN_KEY_VIOLATION) {
                            return Ok(Enroll::NoSuchStudent);
                        }
                        let estr = format!("Error inserting enrollment: {}", &e);
                        return Err(DbError(estr));
                    },
                }
            }
        }

        t.commit().await?;

        log::trace!(
            "    ...{} of {} enrollments inserted.",
            &n_inserted, student_ids.len()
        );
        Ok(Enroll::Enrolled(n_inserted as usize))
    }

    /// Whether `student_id` is enrolled in `class_id`.
    pub async fn is_enrolled(&self, class_id: i64, student_id: i64) -> Result<bool, DbError> {
        log::trace!("Store::is_enrolled( {}, {} ) called.", class_id, student_id);

        let client = self.connect().await?;
        let present = client.query_opt(
            "SELECT 1 FROM enrollments WHERE class_id = $1 AND student_id = $2",
            &[&class_id, &student_id],
        ).await?.is_some();

        Ok(present)
    }

    /// Everything `student_id` is enrolled in, teacher identity attached.
    pub async fn schedule_for_student(
        &self,
        student_id: i64,
    ) -> Result<Vec<ScheduleEntry>, DbError> {
        log::trace!("Store::schedule_for_student( {} ) called.", student_id);

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT c.id, c.name, c.weekday, c.start_time,
                    u.name AS teacher_name, u.email AS teacher_email
                FROM enrollments e
                JOIN classes c ON c.id = e.class_id
                JOIN users u ON u.id = c.teacher_id
                WHERE e.student_id = $1
                ORDER BY c.id",
            &[&student_id],
        ).await?;

        let mut schedule: Vec<ScheduleEntry> = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            schedule.push(ScheduleEntry {
                class_id: row.try_get("id")?,
                class_name: row.try_get("name")?,
                weekday: row.try_get("weekday")?,
                start_time: row.try_get("start_time")?,
                teacher_name: row.try_get("teacher_name")?,
                teacher_email: row.try_get("teacher_email")?,
            });
        }

        Ok(schedule)
    }

    /// Total number of classes; the overview report wants this.
    pub async fn count_classes(&self) -> Result<i64, DbError> {
        log::trace!("Store::count_classes() called.");

        let client = self.connect().await?;
        let row = client.query_one("SELECT COUNT(*) FROM classes", &[]).await?;
        Ok(row.try_get(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serial_test::serial;

    use crate::store::tests::TEST_CONNECTION;
    use crate::store::users::InsertUser;
    use crate::tests::ensure_logging;

    async fn insert_role_user(db: &Store, name: &str, email: &str, role: Role) -> i64 {
        match db.insert_user(name, email, "x", role).await.unwrap() {
            InsertUser::Created(u) => u.id,
            x => panic!("expected Created, got {:?}", &x),
        }
    }

    #[tokio::test]
    #[ignore]
    #[serial]
    async fn enrollment_is_idempotent() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        let teacher = insert_role_user(&db, "Ms Jenny", "jenny@rollcall.test", Role::Teacher).await;
        let s1 = insert_role_user(&db, "John Smith", "js@rollcall.test", Role::Student).await;
        let s2 = insert_role_user(&db, "Jane Doe", "jd@rollcall.test", Role::Student).await;

        let class = match db
            .insert_class("Algebra I", "Monday", "08:30", teacher)
            .await
            .unwrap()
        {
            InsertClass::Created(c) => c,
            x => panic!("expected Created, got {:?}", &x),
        };

        // A student can't own a class.
        assert!(matches!(
            db.insert_class("Shop", "Tuesday", "10:00", s1).await.unwrap(),
            InsertClass::NoSuchTeacher
        ));

        match db.enroll_students(class.id, &[s1, s2]).await.unwrap() {
            Enroll::Enrolled(n) => assert_eq!(n, 2),
            x => panic!("expected Enrolled, got {:?}", &x),
        }
        // Same pair again: no new rows.
        match db.enroll_students(class.id, &[s1, s2]).await.unwrap() {
            Enroll::Enrolled(n) => assert_eq!(n, 0),
            x => panic!("expected Enrolled, got {:?}", &x),
        }
        assert!(matches!(
            db.enroll_students(class.id + 999, &[s1]).await.unwrap(),
            Enroll::NoSuchClass
        ));

        assert!(db.is_enrolled(class.id, s1).await.unwrap());
        assert_eq!(db.class_teacher(class.id).await.unwrap(), Some(teacher));
        assert_eq!(db.class_teacher(class.id + 999).await.unwrap(), None);

        // Another teacher's class reports its own owner, so the ownership
        // gate has something real to mismatch against.
        let other = insert_role_user(&db, "Mr Berro", "berro@rollcall.test", Role::Teacher).await;
        let others_class = match db
            .insert_class("World History", "Tuesday", "10:00", other)
            .await
            .unwrap()
        {
            InsertClass::Created(c) => c,
            x => panic!("expected Created, got {:?}", &x),
        };
        assert_eq!(db.class_teacher(others_class.id).await.unwrap(), Some(other));
        assert_ne!(db.class_teacher(others_class.id).await.unwrap(), Some(teacher));

        let details = db.classes_for_teacher(teacher).await.unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].students.len(), 2);

        let sched = db.schedule_for_student(s1).await.unwrap();
        assert_eq!(sched.len(), 1);
        assert_eq!(sched[0].class_name, "Algebra I");
        assert_eq!(sched[0].teacher_name, "Ms Jenny");

        db.nuke_database().await.unwrap();
    }
}
