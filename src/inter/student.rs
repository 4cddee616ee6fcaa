/*!
Handlers for routes scoped to Student users.

Students see their schedule, check in to classes (optionally via a QR
token), read their own attendance history, and file leave requests.
*/
use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use time::Date;

use crate::config::Glob;
use crate::store::{attendance_rate, AttendanceStatus, CheckIn};
use crate::{local_now, DATE_FMT};
use super::*;

pub fn routes() -> Router {
    Router::new()
        .route("/schedule", get(schedule))
        .route("/attendance/history", get(history))
        .route("/attendance/check-in", post(check_in))
        .route("/leaves", get(get_leaves).post(submit_leave))
        .route_layer(middleware::from_fn(require_student))
        .route_layer(middleware::from_fn(bearer_authenticate))
}

#[derive(Debug, Deserialize)]
struct RangeParams {
    start: Option<String>,
    end: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckInData {
    class_id: i64,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LeaveData {
    from_date: String,
    to_date: String,
    reason: String,
}

async fn schedule(
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(glob): Extension<Arc<Glob>>,
) -> Response {
    log::trace!("student::schedule( [ user {} ] ) called.", user.id);

    match glob.db.schedule_for_student(user.id).await {
        Ok(sched) => (
            StatusCode::OK,
            Json(json!({ "schedule": &sched })),
        ).into_response(),
        Err(e) => {
            log::error!(
                "Store::schedule_for_student( {} ) returned error: {}",
                user.id, &e
            );
            json_500()
        },
    }
}

fn parse_day(text: &str) -> Result<Date, Response> {
    Date::parse(text, DATE_FMT).map_err(|_| {
        respond_bad_request(format!(
            "{:?} is not a valid YYYY-MM-DD date.", text
        ))
    })
}

/**
`GET /student/attendance/history`

The date range only applies when both `start` and `end` are given; the
dashboard sends them as a pair or not at all. The statistics block is
computed over exactly the rows returned.
*/
async fn history(
    Query(params): Query<RangeParams>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(glob): Extension<Arc<Glob>>,
) -> Response {
    log::trace!(
        "student::history( {:?}..{:?}, [ user {} ] ) called.",
        &params.start, &params.end, user.id
    );

    let range = match (&params.start, &params.end) {
        (Some(start), Some(end)) => {
            let from = match parse_day(start) {
                Ok(d) => d,
                Err(resp) => { return resp; },
            };
            let to = match parse_day(end) {
                Ok(d) => d,
                Err(resp) => { return resp; },
            };
            if from > to {
                return respond_bad_request(
                    "Range start must not come after range end.".to_owned()
                );
            }
            Some((from, to))
        },
        _ => None,
    };

    let rows = match glob.db.history_for_student(user.id, range).await {
        Ok(rows) => rows,
        Err(e) => {
            log::error!(
                "Store::history_for_student( {}, ... ) returned error: {}",
                user.id, &e
            );
            return json_500();
        },
    };

    let total = rows.len() as i64;
    let mut counts = [0i64; 4];
    for row in rows.iter() {
        let i = match row.status {
            AttendanceStatus::Present => 0,
            AttendanceStatus::Late    => 1,
            AttendanceStatus::Absent  => 2,
            AttendanceStatus::OnLeave => 3,
        };
        counts[i] += 1;
    }

    (
        StatusCode::OK,
        Json(json!({
            "attendance": &rows,
            "statistics": {
                "total": total,
                "present": counts[0],
                "late": counts[1],
                "absent": counts[2],
                "on_leave": counts[3],
                "attendance_rate": attendance_rate(counts[0], total),
            },
        })),
    ).into_response()
}

/// A supplied token only admits a check-in to the class it was bound to
/// at issuance. An unknown or expired token resolves to `None` and admits
/// nothing.
fn token_admits(bound_class: Option<i64>, class_id: i64) -> bool {
    bound_class == Some(class_id)
}

/**
`POST /student/attendance/check-in`

A token, when supplied, must resolve to an unexpired window bound to the
named class; a missing token is fine (the dashboard's plain check-in
button sends none). The late/on-time call and the one-per-day rule are
the store's business.
*/
async fn check_in(
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(glob): Extension<Arc<Glob>>,
    Json(form): Json<CheckInData>,
) -> Response {
    log::trace!(
        "student::check_in( {}, token: {}, [ user {} ] ) called.",
        form.class_id, form.token.is_some(), user.id
    );

    let now = local_now();

    if let Some(token) = &form.token {
        match glob.db.resolve_qr_token(token, now).await {
            Ok(bound) if token_admits(bound, form.class_id) => {},
            Ok(_) => {
                return respond_forbidden(
                    "That check-in token is invalid, expired, or for another class.",
                );
            },
            Err(e) => {
                log::error!(
                    "Store::resolve_qr_token(...) returned error: {}", &e
                );
                return json_500();
            },
        }
    }

    match glob.db.record_check_in(form.class_id, user.id, now).await {
        Ok(CheckIn::Recorded(status)) => (
            StatusCode::CREATED,
            Json(json!({
                "message": "Checked in.",
                "status": status,
            })),
        ).into_response(),
        Ok(CheckIn::NotEnrolled) => respond_forbidden(
            "You are not enrolled in that class.",
        ),
        Ok(CheckIn::AlreadyCheckedIn) => respond_bad_request(
            "You have already checked in to that class today.".to_owned()
        ),
        Err(e) => {
            log::error!(
                "Store::record_check_in( {}, {}, ... ) returned error: {}",
                form.class_id, user.id, &e
            );
            json_500()
        },
    }
}

async fn submit_leave(
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(glob): Extension<Arc<Glob>>,
    Json(form): Json<LeaveData>,
) -> Response {
    log::trace!(
        "student::submit_leave( {:?}..{:?}, [ user {} ] ) called.",
        &form.from_date, &form.to_date, user.id
    );

    let from = match parse_day(&form.from_date) {
        Ok(d) => d,
        Err(resp) => { return resp; },
    };
    let to = match parse_day(&form.to_date) {
        Ok(d) => d,
        Err(resp) => { return resp; },
    };
    if from > to {
        return respond_bad_request(
            "Leave must not end before it starts.".to_owned()
        );
    }
    if form.reason.trim().is_empty() {
        return respond_bad_request("A reason is required.".to_owned());
    }

    match glob.db.submit_leave(user.id, from, to, form.reason.trim()).await {
        Ok(lr) => (
            StatusCode::CREATED,
            Json(json!({
                "message": "Leave request submitted.",
                "leave_request": &lr,
            })),
        ).into_response(),
        Err(e) => {
            log::error!(
                "Store::submit_leave( {}, ... ) returned error: {}",
                user.id, &e
            );
            json_500()
        },
    }
}

async fn get_leaves(
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(glob): Extension<Arc<Glob>>,
) -> Response {
    log::trace!("student::get_leaves( [ user {} ] ) called.", user.id);

    match glob.db.leaves_for_student(user.id).await {
        Ok(leaves) => (
            StatusCode::OK,
            Json(json!({ "leave_requests": &leaves })),
        ).into_response(),
        Err(e) => {
            log::error!(
                "Store::leaves_for_student( {} ) returned error: {}",
                user.id, &e
            );
            json_500()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_only_admits_its_own_class() {
        assert!(token_admits(Some(3), 3));
        // Bound to a different class: no.
        assert!(!token_admits(Some(3), 4));
        // Unknown or expired: no.
        assert!(!token_admits(None, 3));
    }
}
