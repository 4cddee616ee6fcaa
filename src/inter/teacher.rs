/*!
Handlers for routes scoped to Teacher users.

Teachers see their own classes and rosters, read and correct attendance
sheets, open QR check-in windows, and review leave requests from their
students.
*/
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use time::Date;

use crate::config::Glob;
use crate::qr;
use crate::store::{AttendanceStatus, LeaveStatus, Review};
use crate::user::User;
use crate::{local_now, DATE_FMT};
use super::*;

pub fn routes() -> Router {
    Router::new()
        .route("/classes", get(get_classes))
        .route("/classes/:id/attendance", get(class_attendance))
        .route("/attendance/mark", post(mark_attendance))
        .route("/attendance/open-qr", post(open_qr))
        .route("/leaves", get(pending_leaves))
        .route("/leaves/:id/review", put(review_leave))
        .route_layer(middleware::from_fn(require_teacher))
        .route_layer(middleware::from_fn(bearer_authenticate))
}

#[derive(Debug, Deserialize)]
struct DayParam {
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MarkData {
    class_id: i64,
    student_id: i64,
    status: String,
}

#[derive(Debug, Deserialize)]
struct OpenQrData {
    class_id: i64,
}

#[derive(Debug, Deserialize)]
struct ReviewData {
    status: String,
}

#[derive(Debug, PartialEq)]
enum Ownership {
    Owned,
    SomebodyElses,
    NoSuchClass,
}

/// The gate decision for a teacher acting on a class, separated from the
/// database lookup. Only `Owned` lets the action proceed.
fn classify_ownership(owner: Option<i64>, teacher_id: i64) -> Ownership {
    match owner {
        Some(id) if id == teacher_id => Ownership::Owned,
        Some(_) => Ownership::SomebodyElses,
        None => Ownership::NoSuchClass,
    }
}

/// `Err` carries a ready-made response: the class doesn't exist, it
/// belongs to somebody else, or the lookup itself failed.
async fn check_ownership(
    glob: &Glob,
    class_id: i64,
    teacher: &User,
) -> Result<(), Response> {
    let owner = match glob.db.class_teacher(class_id).await {
        Ok(owner) => owner,
        Err(e) => {
            log::error!(
                "Store::class_teacher( {} ) returned error: {}",
                class_id, &e
            );
            return Err(json_500());
        },
    };

    match classify_ownership(owner, teacher.id) {
        Ownership::Owned => Ok(()),
        Ownership::SomebodyElses => {
            Err(respond_forbidden("That class is not yours."))
        },
        Ownership::NoSuchClass => Err(respond_not_found(format!(
            "No class with id {}.", class_id
        ))),
    }
}

async fn get_classes(
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(glob): Extension<Arc<Glob>>,
) -> Response {
    log::trace!("teacher::get_classes( [ user {} ] ) called.", user.id);

    match glob.db.classes_for_teacher(user.id).await {
        Ok(classes) => (
            StatusCode::OK,
            Json(json!({ "classes": &classes })),
        ).into_response(),
        Err(e) => {
            log::error!(
                "Store::classes_for_teacher( {} ) returned error: {}",
                user.id, &e
            );
            json_500()
        },
    }
}

async fn class_attendance(
    Path(class_id): Path<i64>,
    Query(params): Query<DayParam>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(glob): Extension<Arc<Glob>>,
) -> Response {
    log::trace!(
        "teacher::class_attendance( {}, {:?}, [ user {} ] ) called.",
        class_id, &params.date, user.id
    );

    if let Err(resp) = check_ownership(&glob, class_id, &user).await {
        return resp;
    }

    let day: Date = match &params.date {
        Some(text) => match Date::parse(text, DATE_FMT) {
            Ok(d) => d,
            Err(_) => {
                return respond_bad_request(format!(
                    "{:?} is not a valid YYYY-MM-DD date.", text
                ));
            },
        },
        None => local_now().date(),
    };

    match glob.db.class_attendance_on(class_id, day).await {
        Ok(sheet) => (
            StatusCode::OK,
            Json(json!({ "attendance": &sheet })),
        ).into_response(),
        Err(e) => {
            log::error!(
                "Store::class_attendance_on( {}, {} ) returned error: {}",
                class_id, &day, &e
            );
            json_500()
        },
    }
}

/**
Open a QR check-in window for a class: mint a token, bind it to the class
in storage, and hand back the check-in URL both as text and as a QR PNG
`data:` URL.
*/
async fn open_qr(
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(glob): Extension<Arc<Glob>>,
    Json(form): Json<OpenQrData>,
) -> Response {
    log::trace!(
        "teacher::open_qr( {}, [ user {} ] ) called.",
        form.class_id, user.id
    );

    let class_id = form.class_id;
    if let Err(resp) = check_ownership(&glob, class_id, &user).await {
        return resp;
    }

    let token = qr::generate_token();
    let issued_at = local_now();
    let expires_at = issued_at + qr::TOKEN_TTL;

    let res = glob.db.insert_qr_token(
        &token, class_id, issued_at, expires_at
    ).await;
    if let Err(e) = res {
        log::error!(
            "Store::insert_qr_token( ..., {} ) returned error: {}",
            class_id, &e
        );
        return json_500();
    }

    let check_in_url = format!(
        "{}/check-in/{}",
        &glob.client_base_url, &token
    );
    let qr_code = match qr::render_data_url(&check_in_url) {
        Ok(data_url) => data_url,
        Err(e) => {
            log::error!(
                "qr::render_data_url( {:?} ) returned error: {}",
                &check_in_url, &e
            );
            return json_500();
        },
    };

    (
        StatusCode::OK,
        Json(json!({
            "message": "Check-in window open.",
            "token": &token,
            "check_in_url": &check_in_url,
            "qr_code": &qr_code,
        })),
    ).into_response()
}

/// Manually set a student's status for today. Marking twice overwrites.
async fn mark_attendance(
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(glob): Extension<Arc<Glob>>,
    Json(form): Json<MarkData>,
) -> Response {
    log::trace!(
        "teacher::mark_attendance( {}, {}, {:?}, [ user {} ] ) called.",
        form.class_id, form.student_id, &form.status, user.id
    );

    let status: AttendanceStatus = match form.status.parse() {
        Ok(s) => s,
        Err(_) => {
            return respond_bad_request(format!(
                "{:?} is not a valid attendance status.", &form.status
            ));
        },
    };

    if let Err(resp) = check_ownership(&glob, form.class_id, &user).await {
        return resp;
    }

    match glob.db.is_enrolled(form.class_id, form.student_id).await {
        Ok(true) => {},
        Ok(false) => {
            return respond_bad_request(format!(
                "Student {} is not enrolled in class {}.",
                form.student_id, form.class_id
            ));
        },
        Err(e) => {
            log::error!(
                "Store::is_enrolled( {}, {} ) returned error: {}",
                form.class_id, form.student_id, &e
            );
            return json_500();
        },
    }

    let res = glob.db.mark_attendance(
        form.class_id, form.student_id, status, local_now()
    ).await;

    match res {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "message": "Attendance marked.",
                "status": status,
            })),
        ).into_response(),
        Err(e) => {
            log::error!("Store::mark_attendance(...) returned error: {}", &e);
            json_500()
        },
    }
}

async fn pending_leaves(
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(glob): Extension<Arc<Glob>>,
) -> Response {
    log::trace!("teacher::pending_leaves( [ user {} ] ) called.", user.id);

    match glob.db.pending_for_teacher(user.id).await {
        Ok(leaves) => (
            StatusCode::OK,
            Json(json!({ "leave_requests": &leaves })),
        ).into_response(),
        Err(e) => {
            log::error!(
                "Store::pending_for_teacher( {} ) returned error: {}",
                user.id, &e
            );
            json_500()
        },
    }
}

async fn review_leave(
    Path(leave_id): Path<i64>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(glob): Extension<Arc<Glob>>,
    Json(form): Json<ReviewData>,
) -> Response {
    log::trace!(
        "teacher::review_leave( {}, {:?}, [ user {} ] ) called.",
        leave_id, &form.status, user.id
    );

    let status: LeaveStatus = match form.status.parse() {
        Ok(LeaveStatus::Pending) | Err(_) => {
            return respond_bad_request(format!(
                "{:?} is not a valid review outcome.", &form.status
            ));
        },
        Ok(s) => s,
    };

    match glob.db.review_leave(leave_id, user.id, status, local_now()).await {
        Ok(Review::Updated) => (
            StatusCode::OK,
            Json(json!({
                "message": "Leave request reviewed.",
                "status": status,
            })),
        ).into_response(),
        Ok(Review::NotPermitted) => respond_forbidden(
            "No pending leave request with that id is reviewable by you.",
        ),
        Err(e) => {
            log::error!(
                "Store::review_leave( {}, {}, ... ) returned error: {}",
                leave_id, user.id, &e
            );
            json_500()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_owner_gets_through() {
        assert_eq!(classify_ownership(Some(17), 17), Ownership::Owned);
        // Somebody else's class is forbidden, not "not found".
        assert_eq!(classify_ownership(Some(18), 17), Ownership::SomebodyElses);
        assert_eq!(classify_ownership(None, 17), Ownership::NoSuchClass);
    }
}
