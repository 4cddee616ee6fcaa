/*!
`Store` methods for attendance rows and the check-in decision.

```sql
CREATE TABLE attendance (
    id          BIGSERIAL PRIMARY KEY,
    class_id    BIGINT NOT NULL REFERENCES classes(id),
    student_id  BIGINT NOT NULL REFERENCES users(id),
    taken_at    TIMESTAMPTZ NOT NULL,
    taken_on    DATE NOT NULL,  /* server-local calendar day of taken_at */
    status      TEXT NOT NULL,
    UNIQUE(class_id, student_id, taken_on)
);

CREATE TABLE qr_tokens (
    token       TEXT PRIMARY KEY,
    class_id    BIGINT NOT NULL REFERENCES classes(id),
    issued_at   TIMESTAMPTZ NOT NULL,
    expires_at  TIMESTAMPTZ NOT NULL
);
```

The `UNIQUE(class_id, student_id, taken_on)` constraint is what actually
enforces one check-in per student per class per calendar day: two
simultaneous check-ins can both pass the pre-insert existence check, but
only one insert survives, and the loser maps to `CheckIn::AlreadyCheckedIn`.
*/
use serde::{Deserialize, Serialize};
use time::{Date, Duration, OffsetDateTime, Time};
use tokio_postgres::error::SqlState;

use super::{DbError, Store};
use crate::START_TIME_FMT;

/// A check-in is Late strictly after class start plus this grace window.
pub const LATE_GRACE: Duration = Duration::minutes(15);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
    OnLeave,
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let token = match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Late    => "Late",
            AttendanceStatus::Absent  => "Absent",
            AttendanceStatus::OnLeave => "OnLeave",
        };

        write!(f, "{}", token)
    }
}

impl std::str::FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Present" => Ok(AttendanceStatus::Present),
            "Late"    => Ok(AttendanceStatus::Late),
            "Absent"  => Ok(AttendanceStatus::Absent),
            "OnLeave" => Ok(AttendanceStatus::OnLeave),
            _ => Err(format!("{:?} is not a valid AttendanceStatus.", s)),
        }
    }
}

/// Outcome of a student check-in attempt.
#[derive(Debug, PartialEq)]
pub enum CheckIn {
    Recorded(AttendanceStatus),
    NotEnrolled,
    AlreadyCheckedIn,
}

/// One row of a class's attendance sheet for a given day.
#[derive(Debug, Serialize)]
pub struct ClassDayRow {
    pub student_id: i64,
    pub student_name: String,
    pub student_email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub taken_at: OffsetDateTime,
    pub status: AttendanceStatus,
}

/// One row of a student's attendance history.
#[derive(Debug, Serialize)]
pub struct HistoryRow {
    pub class_id: i64,
    pub class_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub taken_at: OffsetDateTime,
    pub status: AttendanceStatus,
}

/// Classify a check-in at `now` against a class that starts at `start`
/// (on the day of `now`).
///
/// The boundary is inclusive on the Present side: a check-in at exactly
/// start + 15:00 is still Present; one second later is Late.
pub fn classify_check_in(start: Time, now: OffsetDateTime) -> AttendanceStatus {
    let threshold = now.replace_time(start) + LATE_GRACE;
    if now > threshold {
        AttendanceStatus::Late
    } else {
        AttendanceStatus::Present
    }
}

/// Whole-percent attendance rate: round(100 * present / total), 0 when
/// there are no rows at all.
pub fn attendance_rate(present: i64, total: i64) -> i64 {
    if total == 0 {
        0
    } else {
        (100.0 * present as f64 / total as f64).round() as i64
    }
}

impl Store {
    /**
    Record a student-initiated check-in for `(class_id, student_id)` at `now`.

    In order:
      1. no enrollment for the pair ⇒ `NotEnrolled`;
      2. an attendance row already on `now`'s calendar day ⇒
         `AlreadyCheckedIn`;
      3. otherwise classify against the class's start time and insert.

    The class's recorded weekday is deliberately not consulted: a check-in
    on an off day still lands, and only the schedule views filter by day.
    */
    pub async fn record_check_in(
        &self,
        class_id: i64,
        student_id: i64,
        now: OffsetDateTime,
    ) -> Result<CheckIn, DbError> {
        log::trace!(
            "Store::record_check_in( {}, {}, {} ) called.",
            class_id, student_id, &now
        );

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let enrolled = t.query_opt(
            "SELECT 1 FROM enrollments WHERE class_id = $1 AND student_id = $2",
            &[&class_id, &student_id],
        ).await?.is_some();
        if !enrolled {
            return Ok(CheckIn::NotEnrolled);
        }

        let taken_on: Date = now.date();
        let already = t.query_opt(
            "SELECT 1 FROM attendance
                WHERE class_id = $1 AND student_id = $2 AND taken_on = $3",
            &[&class_id, &student_id, &taken_on],
        ).await?.is_some();
        if already {
            return Ok(CheckIn::AlreadyCheckedIn);
        }

        // The enrollment row's foreign key guarantees the class exists.
        let start_str: String = t.query_one(
            "SELECT start_time FROM classes WHERE id = $1",
            &[&class_id],
        ).await?.try_get("start_time")?;
        let start = Time::parse(&start_str, START_TIME_FMT).map_err(|e| {
            DbError(format!(
                "Class {} has unparseable start_time {:?}: {}",
                class_id, &start_str, &e
            ))
        })?;

        let status = classify_check_in(start, now);

        let res = t.execute(
            "INSERT INTO attendance (class_id, student_id, taken_at, taken_on, status)
                VALUES ($1, $2, $3, $4, $5)",
            &[&class_id, &student_id, &now, &taken_on, &status.to_string()],
        ).await;

        match res {
            Ok(_) => {
                t.commit().await?;
                Ok(CheckIn::Recorded(status))
            },
            Err(e) => {
                // A concurrent check-in won the race between our existence
                // check and our insert.
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    log::trace!(
                        "    ...lost check-in race for ({}, {}, {}).",
                        class_id, student_id, &taken_on
                    );
                    Ok(CheckIn::AlreadyCheckedIn)
                } else {
                    Err(DbError::from(e).annotate("Error inserting attendance row"))
                }
            },
        }
    }

    /// Teacher's manual mark for `(class_id, student_id)` on `now`'s day.
    ///
    /// Unlike a student check-in, marking twice is not a conflict: the
    /// second mark overwrites the day's status.
    pub async fn mark_attendance(
        &self,
        class_id: i64,
        student_id: i64,
        status: AttendanceStatus,
        now: OffsetDateTime,
    ) -> Result<(), DbError> {
        log::trace!(
            "Store::mark_attendance( {}, {}, {}, {} ) called.",
            class_id, student_id, status, &now
        );

        let client = self.connect().await?;
        let taken_on: Date = now.date();

        client.execute(
            "INSERT INTO attendance (class_id, student_id, taken_at, taken_on, status)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (class_id, student_id, taken_on) DO UPDATE SET
                    status = excluded.status",
            &[&class_id, &student_id, &now, &taken_on, &status.to_string()],
        ).await?;

        Ok(())
    }

    /// The attendance sheet of `class_id` on calendar day `day`, newest
    /// check-in first.
    pub async fn class_attendance_on(
        &self,
        class_id: i64,
        day: Date,
    ) -> Result<Vec<ClassDayRow>, DbError> {
        log::trace!("Store::class_attendance_on( {}, {} ) called.", class_id, &day);

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT a.student_id, u.name, u.email, a.taken_at, a.status
                FROM attendance a JOIN users u ON u.id = a.student_id
                WHERE a.class_id = $1 AND a.taken_on = $2
                ORDER BY a.taken_at DESC",
            &[&class_id, &day],
        ).await?;

        let mut sheet: Vec<ClassDayRow> = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            let status_str: &str = row.try_get("status")?;
            sheet.push(ClassDayRow {
                student_id: row.try_get("student_id")?,
                student_name: row.try_get("name")?,
                student_email: row.try_get("email")?,
                taken_at: row.try_get("taken_at")?,
                status: status_str.parse()?,
            });
        }

        Ok(sheet)
    }

    /// A student's attendance history, newest first, optionally limited
    /// to `[from, to]` (both bounds required to apply, as the dashboard
    /// sends them together or not at all).
    pub async fn history_for_student(
        &self,
        student_id: i64,
        range: Option<(Date, Date)>,
    ) -> Result<Vec<HistoryRow>, DbError> {
        log::trace!(
            "Store::history_for_student( {}, {:?} ) called.",
            student_id, &range
        );

        let client = self.connect().await?;
        let rows = match range {
            Some((from, to)) => client.query(
                "SELECT a.class_id, c.name, a.taken_at, a.status
                    FROM attendance a JOIN classes c ON c.id = a.class_id
                    WHERE a.student_id = $1
                        AND a.taken_on >= $2 AND a.taken_on <= $3
                    ORDER BY a.taken_at DESC",
                &[&student_id, &from, &to],
            ).await?,
            None => client.query(
                "SELECT a.class_id, c.name, a.taken_at, a.status
                    FROM attendance a JOIN classes c ON c.id = a.class_id
                    WHERE a.student_id = $1
                    ORDER BY a.taken_at DESC",
                &[&student_id],
            ).await?,
        };

        let mut history: Vec<HistoryRow> = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            let status_str: &str = row.try_get("status")?;
            history.push(HistoryRow {
                class_id: row.try_get("class_id")?,
                class_name: row.try_get("name")?,
                taken_at: row.try_get("taken_at")?,
                status: status_str.parse()?,
            });
        }

        Ok(history)
    }

    /// (total rows, Present rows) across the whole system, for the
    /// overview report.
    pub async fn count_attendance(&self) -> Result<(i64, i64), DbError> {
        log::trace!("Store::count_attendance() called.");

        let client = self.connect().await?;
        let (total, present) = tokio::join!(
            client.query_one("SELECT COUNT(*) FROM attendance", &[]),
            client.query_one(
                "SELECT COUNT(*) FROM attendance WHERE status = 'Present'",
                &[],
            ),
        );

        Ok((total?.try_get(0)?, present?.try_get(0)?))
    }

    /// Persist a freshly-issued QR check-in token bound to `class_id`.
    ///
    /// Tokens already expired as of `issued_at` are swept out on the way
    /// in; there is no background reaper, so this is what keeps the table
    /// from growing without bound.
    pub async fn insert_qr_token(
        &self,
        token: &str,
        class_id: i64,
        issued_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> Result<(), DbError> {
        log::trace!(
            "Store::insert_qr_token( {:?}, {}, ... ) called.",
            token, class_id
        );

        let client = self.connect().await?;

        let n_swept = client.execute(
            "DELETE FROM qr_tokens WHERE expires_at <= $1",
            &[&issued_at],
        ).await?;
        if n_swept > 0 {
            log::trace!("    ...swept {} stale tokens.", n_swept);
        }

        client.execute(
            "INSERT INTO qr_tokens (token, class_id, issued_at, expires_at)
                VALUES ($1, $2, $3, $4)",
            &[&token, &class_id, &issued_at, &expires_at],
        ).await?;

        Ok(())
    }

    /// The class a token is bound to, if the token exists and is still
    /// current at `now`.
    pub async fn resolve_qr_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> Result<Option<i64>, DbError> {
        log::trace!("Store::resolve_qr_token( {:?}, {} ) called.", token, &now);

        let client = self.connect().await?;
        match client.query_opt(
            "SELECT class_id FROM qr_tokens WHERE token = $1 AND expires_at > $2",
            &[&token, &now],
        ).await? {
            Some(row) => Ok(Some(row.try_get("class_id")?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serial_test::serial;
    use time::macros::{datetime, time};

    use crate::store::classes::{Enroll, InsertClass};
    use crate::store::tests::TEST_CONNECTION;
    use crate::store::users::InsertUser;
    use crate::tests::ensure_logging;
    use crate::user::Role;

    #[test]
    fn late_threshold_boundaries() {
        let start = time!(08:30);

        // Early and on-time.
        assert_eq!(
            classify_check_in(start, datetime!(2024-03-04 08:00:00 UTC)),
            AttendanceStatus::Present
        );
        assert_eq!(
            classify_check_in(start, datetime!(2024-03-04 08:44:59 UTC)),
            AttendanceStatus::Present
        );
        // Exactly start + 15:00 still counts as on-time.
        assert_eq!(
            classify_check_in(start, datetime!(2024-03-04 08:45:00 UTC)),
            AttendanceStatus::Present
        );
        // One second past the grace window.
        assert_eq!(
            classify_check_in(start, datetime!(2024-03-04 08:45:01 UTC)),
            AttendanceStatus::Late
        );
        assert_eq!(
            classify_check_in(start, datetime!(2024-03-04 11:00:00 UTC)),
            AttendanceStatus::Late
        );
    }

    #[test]
    fn classification_respects_offset() {
        // Same instant, expressed in a non-UTC offset; the wall clock is
        // what matters.
        let start = time!(08:30);
        assert_eq!(
            classify_check_in(start, datetime!(2024-03-04 08:40:00 +7)),
            AttendanceStatus::Present
        );
        assert_eq!(
            classify_check_in(start, datetime!(2024-03-04 08:46:00 +7)),
            AttendanceStatus::Late
        );
    }

    #[test]
    fn rate_rounding() {
        assert_eq!(attendance_rate(0, 0), 0);
        assert_eq!(attendance_rate(0, 5), 0);
        assert_eq!(attendance_rate(1, 1), 100);
        assert_eq!(attendance_rate(3, 4), 75);
        assert_eq!(attendance_rate(2, 3), 67);
        assert_eq!(attendance_rate(5, 8), 63);
    }

    async fn seed_class(db: &Store) -> (i64, i64) {
        let teacher = match db
            .insert_user("Ms Jenny", "jenny@rollcall.test", "x", Role::Teacher)
            .await
            .unwrap()
        {
            InsertUser::Created(u) => u.id,
            x => panic!("expected Created, got {:?}", &x),
        };
        let student = match db
            .insert_user("John Smith", "js@rollcall.test", "x", Role::Student)
            .await
            .unwrap()
        {
            InsertUser::Created(u) => u.id,
            x => panic!("expected Created, got {:?}", &x),
        };
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

        (class.id, student)
    }

    #[tokio::test]
    #[ignore]
    #[serial]
    async fn one_check_in_per_day() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();
        let (class_id, student_id) = seed_class(&db).await;

        let now = datetime!(2024-03-04 08:40:00 UTC);
        match db.record_check_in(class_id, student_id, now).await.unwrap() {
            CheckIn::Recorded(AttendanceStatus::Present) => {},
            x => panic!("expected Present check-in, got {:?}", &x),
        }

        // Later the same day: refused, still exactly one row.
        let later = datetime!(2024-03-04 09:10:00 UTC);
        assert_eq!(
            db.record_check_in(class_id, student_id, later).await.unwrap(),
            CheckIn::AlreadyCheckedIn
        );
        let sheet = db
            .class_attendance_on(class_id, now.date())
            .await
            .unwrap();
        assert_eq!(sheet.len(), 1);
        assert_eq!(sheet[0].status, AttendanceStatus::Present);

        // Next day is a fresh window, and 09:10 is past the grace window.
        let next_day = datetime!(2024-03-05 09:10:00 UTC);
        match db.record_check_in(class_id, student_id, next_day).await.unwrap() {
            CheckIn::Recorded(AttendanceStatus::Late) => {},
            x => panic!("expected Late check-in, got {:?}", &x),
        }

        // Unenrolled caller.
        assert_eq!(
            db.record_check_in(class_id, student_id + 999, now).await.unwrap(),
            CheckIn::NotEnrolled
        );

        let history = db.history_for_student(student_id, None).await.unwrap();
        assert_eq!(history.len(), 2);

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    #[serial]
    async fn manual_mark_overwrites() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();
        let (class_id, student_id) = seed_class(&db).await;

        let now = datetime!(2024-03-04 08:40:00 UTC);
        db.mark_attendance(class_id, student_id, AttendanceStatus::Absent, now)
            .await
            .unwrap();
        db.mark_attendance(class_id, student_id, AttendanceStatus::OnLeave, now)
            .await
            .unwrap();

        let sheet = db.class_attendance_on(class_id, now.date()).await.unwrap();
        assert_eq!(sheet.len(), 1);
        assert_eq!(sheet[0].status, AttendanceStatus::OnLeave);

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    #[serial]
    async fn qr_tokens_bind_and_expire() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();
        let (class_id, _) = seed_class(&db).await;

        let teacher = db
            .get_user_by_email("jenny@rollcall.test")
            .await
            .unwrap()
            .unwrap();
        let other_class = match db
            .insert_class("Chemistry", "Thursday", "13:15", teacher.id)
            .await
            .unwrap()
        {
            InsertClass::Created(c) => c.id,
            x => panic!("expected Created, got {:?}", &x),
        };

        let issued = datetime!(2024-03-04 08:25:00 UTC);
        let expires = issued + Duration::minutes(10);
        db.insert_qr_token("tok-abc", class_id, issued, expires)
            .await
            .unwrap();
        db.insert_qr_token("tok-chem", other_class, issued, expires)
            .await
            .unwrap();

        // Each token resolves to the class it was issued for, and no other.
        let live = issued + Duration::minutes(5);
        assert_eq!(
            db.resolve_qr_token("tok-abc", live).await.unwrap(),
            Some(class_id)
        );
        assert_eq!(
            db.resolve_qr_token("tok-chem", live).await.unwrap(),
            Some(other_class)
        );
        assert_ne!(
            db.resolve_qr_token("tok-abc", live).await.unwrap(),
            Some(other_class)
        );

        // At and past expiry: gone.
        assert_eq!(
            db.resolve_qr_token("tok-abc", expires).await.unwrap(),
            None
        );
        assert_eq!(
            db.resolve_qr_token("tok-never-issued", issued).await.unwrap(),
            None
        );

        // A later issuance sweeps rows already expired at that point: the
        // old token is deleted outright, not just treated as expired, so
        // resolving it even within its original window finds nothing.
        let much_later = issued + Duration::hours(2);
        db.insert_qr_token(
            "tok-next-period", class_id, much_later,
            much_later + Duration::minutes(10),
        ).await.unwrap();
        assert_eq!(
            db.resolve_qr_token("tok-abc", live).await.unwrap(),
            None
        );
        assert_eq!(
            db.resolve_qr_token("tok-next-period", much_later + Duration::minutes(1))
                .await
                .unwrap(),
            Some(class_id)
        );

        db.nuke_database().await.unwrap();
    }
}
