/*!
`Store` methods for leave requests.

```sql
CREATE TABLE leave_requests (
    id          BIGSERIAL PRIMARY KEY,
    student_id  BIGINT NOT NULL REFERENCES users(id),
    from_day    DATE NOT NULL,
    to_day      DATE NOT NULL,
    reason      TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'Pending',
    reviewed_by BIGINT REFERENCES users(id),
    reviewed_at TIMESTAMPTZ
);
```

A request starts `Pending` and is moved to `Approved` or `Rejected` exactly
once, by a teacher who has the requesting student in at least one of their
classes. The scoping lives in the `UPDATE`'s `WHERE` clause rather than in
application code, so two teachers reviewing concurrently can't both win.
*/
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use tokio_postgres::Row;

use super::{DbError, Store};
use crate::DATE_FMT;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for LeaveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let token = match self {
            LeaveStatus::Pending  => "Pending",
            LeaveStatus::Approved => "Approved",
            LeaveStatus::Rejected => "Rejected",
        };

        write!(f, "{}", token)
    }
}

impl std::str::FromStr for LeaveStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending"  => Ok(LeaveStatus::Pending),
            "Approved" => Ok(LeaveStatus::Approved),
            "Rejected" => Ok(LeaveStatus::Rejected),
            _ => Err(format!("{:?} is not a valid LeaveStatus.", s)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LeaveRequest {
    pub id: i64,
    pub student_id: i64,
    /// Only populated in views a teacher sees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    pub from_day: String,
    pub to_day: String,
    pub reason: String,
    pub status: LeaveStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer_name: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub reviewed_at: Option<OffsetDateTime>,
}

/// Outcome of a teacher's review of a leave request.
#[derive(Debug, PartialEq)]
pub enum Review {
    Updated,
    /// No pending request with that id is visible to this teacher; either
    /// it doesn't exist, it was already reviewed, or the student isn't in
    /// any of the teacher's classes.
    NotPermitted,
}

fn leave_from_row(row: &Row) -> Result<LeaveRequest, DbError> {
    let status_str: &str = row.try_get("status")?;
    let from_day: Date = row.try_get("from_day")?;
    let to_day: Date = row.try_get("to_day")?;

    let fmt_day = |d: Date| d.format(DATE_FMT)
        .map_err(|e| DbError::from(format!("Error formatting date: {}", &e)));

    let lr = LeaveRequest {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        student_name: row.try_get("student_name").ok(),
        from_day: fmt_day(from_day)?,
        to_day: fmt_day(to_day)?,
        reason: row.try_get("reason")?,
        status: status_str.parse()?,
        reviewer_name: row.try_get("reviewer_name").unwrap_or(None),
        reviewed_at: row.try_get("reviewed_at")?,
    };

    Ok(lr)
}

impl Store {
    /// File a new leave request for `student_id`; starts out `Pending`.
    pub async fn submit_leave(
        &self,
        student_id: i64,
        from_day: Date,
        to_day: Date,
        reason: &str,
    ) -> Result<LeaveRequest, DbError> {
        log::trace!(
            "Store::submit_leave( {}, {}, {}, {:?} ) called.",
            student_id, &from_day, &to_day, reason
        );

        let client = self.connect().await?;
        let row = client.query_one(
            "INSERT INTO leave_requests (student_id, from_day, to_day, reason)
                VALUES ($1, $2, $3, $4)
                RETURNING id, student_id, from_day, to_day, reason, status,
                          NULL::TEXT AS reviewer_name, reviewed_at",
            &[&student_id, &from_day, &to_day, &reason],
        ).await.map_err(|e| DbError::from(e)
            .annotate("Error inserting leave request"))?;

        leave_from_row(&row)
    }

    /// All of a student's leave requests, newest first, with the reviewing
    /// teacher's name where one has weighed in.
    pub async fn leaves_for_student(
        &self,
        student_id: i64,
    ) -> Result<Vec<LeaveRequest>, DbError> {
        log::trace!("Store::leaves_for_student( {} ) called.", student_id);

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT lr.id, lr.student_id, lr.from_day, lr.to_day, lr.reason,
                    lr.status, u.name AS reviewer_name, lr.reviewed_at
                FROM leave_requests lr
                    LEFT JOIN users u ON u.id = lr.reviewed_by
                WHERE lr.student_id = $1
                ORDER BY lr.id DESC",
            &[&student_id],
        ).await?;

        let mut leaves: Vec<LeaveRequest> = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            leaves.push(leave_from_row(row)?);
        }

        Ok(leaves)
    }

    /// Pending requests from students enrolled in any of `teacher_id`'s
    /// classes, soonest leave first.
    pub async fn pending_for_teacher(
        &self,
        teacher_id: i64,
    ) -> Result<Vec<LeaveRequest>, DbError> {
        log::trace!("Store::pending_for_teacher( {} ) called.", teacher_id);

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT lr.id, lr.student_id, lr.from_day, lr.to_day, lr.reason,
                    lr.status, s.name AS student_name, lr.reviewed_at
                FROM leave_requests lr
                    JOIN users s ON s.id = lr.student_id
                WHERE lr.status = 'Pending'
                    AND EXISTS (
                        SELECT 1 FROM enrollments e
                            JOIN classes c ON c.id = e.class_id
                            WHERE e.student_id = lr.student_id
                                AND c.teacher_id = $1
                    )
                ORDER BY lr.from_day ASC, lr.id ASC",
            &[&teacher_id],
        ).await?;

        let mut leaves: Vec<LeaveRequest> = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            leaves.push(leave_from_row(row)?);
        }

        Ok(leaves)
    }

    /**
    Move pending request `leave_id` to `status` on behalf of `teacher_id`.

    The `WHERE` clause carries all the guards at once; a request that is
    missing, already reviewed, or outside the teacher's classes updates
    zero rows and comes back `NotPermitted`.
    */
    pub async fn review_leave(
        &self,
        leave_id: i64,
        teacher_id: i64,
        status: LeaveStatus,
        now: OffsetDateTime,
    ) -> Result<Review, DbError> {
        log::trace!(
            "Store::review_leave( {}, {}, {} ) called.",
            leave_id, teacher_id, status
        );

        let client = self.connect().await?;
        let n = client.execute(
            "UPDATE leave_requests lr SET
                    status = $3,
                    reviewed_by = $2,
                    reviewed_at = $4
                WHERE lr.id = $1
                    AND lr.status = 'Pending'
                    AND EXISTS (
                        SELECT 1 FROM enrollments e
                            JOIN classes c ON c.id = e.class_id
                            WHERE e.student_id = lr.student_id
                                AND c.teacher_id = $2
                    )",
            &[&leave_id, &teacher_id, &status.to_string(), &now],
        ).await?;

        match n {
            0 => Ok(Review::NotPermitted),
            _ => Ok(Review::Updated),
        }
    }

    /// Number of leave requests currently awaiting review, for the
    /// overview report.
    pub async fn count_pending_leaves(&self) -> Result<i64, DbError> {
        log::trace!("Store::count_pending_leaves() called.");

        let client = self.connect().await?;
        let row = client.query_one(
            "SELECT COUNT(*) FROM leave_requests WHERE status = 'Pending'",
            &[],
        ).await?;

        Ok(row.try_get(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serial_test::serial;
    use time::macros::{date, datetime};

    use crate::store::classes::{Enroll, InsertClass};
    use crate::store::tests::TEST_CONNECTION;
    use crate::store::users::InsertUser;
    use crate::tests::ensure_logging;
    use crate::user::Role;

    #[test]
    fn status_round_trip() {
        for status in [LeaveStatus::Pending, LeaveStatus::Approved, LeaveStatus::Rejected] {
            let s = status.to_string();
            assert_eq!(s.parse::<LeaveStatus>().unwrap(), status);
        }
        assert!("pending".parse::<LeaveStatus>().is_err());
    }

    async fn mk_user(db: &Store, name: &str, email: &str, role: Role) -> i64 {
        match db.insert_user(name, email, "x", role).await.unwrap() {
            InsertUser::Created(u) => u.id,
            x => panic!("expected Created, got {:?}", &x),
        }
    }

    #[tokio::test]
    #[ignore]
    #[serial]
    async fn review_scoping_and_transitions() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        let teacher = mk_user(&db, "Mr Berro", "berro@rollcall.test", Role::Teacher).await;
        let other = mk_user(&db, "Ms Jenny", "jenny@rollcall.test", Role::Teacher).await;
        let student = mk_user(&db, "John Smith", "js@rollcall.test", Role::Student).await;

        let class = match db
            .insert_class("Algebra I", "Monday", "08:30", teacher)
            .await
            .unwrap()
        {
            InsertClass::Created(c) => c,
            x => panic!("expected Created, got {:?}", &x),
        };
        match db.enroll_students(class.id, &[student]).await.unwrap() {
            Enroll::Enrolled(1) => {},
            x => panic!("expected one enrollment, got {:?}", &x),
        }

        let lr = db
            .submit_leave(student, date!(2024-03-11), date!(2024-03-12), "dentist")
            .await
            .unwrap();
        assert_eq!(lr.status, LeaveStatus::Pending);
        assert_eq!(lr.from_day, "2024-03-11");

        // Visible to the student's teacher, not to an unrelated one.
        assert_eq!(db.pending_for_teacher(teacher).await.unwrap().len(), 1);
        assert!(db.pending_for_teacher(other).await.unwrap().is_empty());
        assert_eq!(db.count_pending_leaves().await.unwrap(), 1);

        let now = datetime!(2024-03-10 12:00:00 UTC);

        // An unrelated teacher can't review it.
        assert_eq!(
            db.review_leave(lr.id, other, LeaveStatus::Approved, now)
                .await
                .unwrap(),
            Review::NotPermitted
        );

        assert_eq!(
            db.review_leave(lr.id, teacher, LeaveStatus::Approved, now)
                .await
                .unwrap(),
            Review::Updated
        );

        // Already reviewed; no second transition.
        assert_eq!(
            db.review_leave(lr.id, teacher, LeaveStatus::Rejected, now)
                .await
                .unwrap(),
            Review::NotPermitted
        );

        let leaves = db.leaves_for_student(student).await.unwrap();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].status, LeaveStatus::Approved);
        assert_eq!(leaves[0].reviewer_name.as_deref(), Some("Mr Berro"));
        assert!(leaves[0].reviewed_at.is_some());

        assert_eq!(db.count_pending_leaves().await.unwrap(), 0);

        db.nuke_database().await.unwrap();
    }
}
