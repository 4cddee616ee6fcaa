/*!
Handlers for routes scoped to Admin users.

Admins manage the user roster and the class catalog, and get the
system-wide overview report.
*/
use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use time::Time;

use crate::auth;
use crate::config::Glob;
use crate::store::{
    attendance_rate,
    classes::{Enroll, InsertClass},
    users::{DeleteUser, InsertUser, UpdateUser},
};
use crate::user::Role;
use crate::START_TIME_FMT;
use super::*;

static WEEKDAYS: &[&str] = &[
    "Monday", "Tuesday", "Wednesday", "Thursday", "Friday",
    "Saturday", "Sunday",
];

pub fn routes() -> Router {
    Router::new()
        .route("/users", get(get_users).post(create_user))
        .route("/users/:id", put(update_user).delete(delete_user))
        .route("/classes", get(get_classes).post(create_class))
        .route("/classes/:id/enrollments", post(enroll_students))
        .route("/reports/overview", get(overview))
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn(bearer_authenticate))
}

#[derive(Debug, Deserialize)]
struct NewUserData {
    name: String,
    email: String,
    password: String,
    role: String,
}

#[derive(Debug, Deserialize)]
struct UpdateUserData {
    name: String,
    email: String,
    role: String,
}

#[derive(Debug, Deserialize)]
struct NewClassData {
    name: String,
    weekday: String,
    start_time: String,
    teacher_id: i64,
}

#[derive(Debug, Deserialize)]
struct EnrollData {
    student_ids: Vec<i64>,
}

async fn get_users(Extension(glob): Extension<Arc<Glob>>) -> Response {
    log::trace!("admin::get_users( [ global state ] ) called.");

    match glob.db.get_users().await {
        Ok(users) => (
            StatusCode::OK,
            Json(json!({ "users": &users })),
        ).into_response(),
        Err(e) => {
            log::error!("Store::get_users() returned error: {}", &e);
            json_500()
        },
    }
}

async fn create_user(
    Extension(glob): Extension<Arc<Glob>>,
    Json(form): Json<NewUserData>,
) -> Response {
    log::trace!(
        "admin::create_user( {:?}, {:?}, {:?} ) called.",
        &form.name, &form.email, &form.role
    );

    let role: Role = match form.role.parse() {
        Ok(r) => r,
        Err(_) => {
            return respond_bad_request(format!(
                "{:?} is not a valid role.", &form.role
            ));
        },
    };
    if form.password.is_empty() {
        return respond_bad_request("Password must not be empty.".to_owned());
    }

    let pwhash = match auth::hash_password(&form.password) {
        Ok(h) => h,
        Err(e) => {
            log::error!("Error hashing password: {}", &e);
            return json_500();
        },
    };

    match glob.db.insert_user(&form.name, &form.email, &pwhash, role).await {
        Ok(InsertUser::Created(user)) => (
            StatusCode::CREATED,
            Json(json!({
                "message": "User created.",
                "user": &user,
            })),
        ).into_response(),
        Ok(InsertUser::DuplicateEmail) => respond_bad_request(format!(
            "The email {:?} is already in use.", &form.email
        )),
        Err(e) => {
            log::error!("Store::insert_user(...) returned error: {}", &e);
            json_500()
        },
    }
}

async fn update_user(
    Path(id): Path<i64>,
    Extension(glob): Extension<Arc<Glob>>,
    Json(form): Json<UpdateUserData>,
) -> Response {
    log::trace!(
        "admin::update_user( {}, {:?}, {:?}, {:?} ) called.",
        id, &form.name, &form.email, &form.role
    );

    let role: Role = match form.role.parse() {
        Ok(r) => r,
        Err(_) => {
            return respond_bad_request(format!(
                "{:?} is not a valid role.", &form.role
            ));
        },
    };

    match glob.db.update_user(id, &form.name, &form.email, role).await {
        Ok(UpdateUser::Updated(user)) => (
            StatusCode::OK,
            Json(json!({
                "message": "User updated.",
                "user": &user,
            })),
        ).into_response(),
        Ok(UpdateUser::DuplicateEmail) => respond_bad_request(format!(
            "The email {:?} is already in use.", &form.email
        )),
        Ok(UpdateUser::NoSuchUser) => respond_not_found(format!(
            "No user with id {}.", id
        )),
        Err(e) => {
            log::error!("Store::update_user(...) returned error: {}", &e);
            json_500()
        },
    }
}

async fn delete_user(
    Path(id): Path<i64>,
    Extension(glob): Extension<Arc<Glob>>,
) -> Response {
    log::trace!("admin::delete_user( {} ) called.", id);

    match glob.db.delete_user(id).await {
        Ok(DeleteUser::Deleted) => (
            StatusCode::OK,
            Json(json!({ "message": "User deleted." })),
        ).into_response(),
        Ok(DeleteUser::InUse) => respond_bad_request(
            "That user is still referenced by classes, enrollments, attendance, or leave requests.".to_owned()
        ),
        Ok(DeleteUser::NoSuchUser) => respond_not_found(format!(
            "No user with id {}.", id
        )),
        Err(e) => {
            log::error!("Store::delete_user( {} ) returned error: {}", id, &e);
            json_500()
        },
    }
}

async fn get_classes(Extension(glob): Extension<Arc<Glob>>) -> Response {
    log::trace!("admin::get_classes( [ global state ] ) called.");

    match glob.db.get_classes().await {
        Ok(classes) => (
            StatusCode::OK,
            Json(json!({ "classes": &classes })),
        ).into_response(),
        Err(e) => {
            log::error!("Store::get_classes() returned error: {}", &e);
            json_500()
        },
    }
}

async fn create_class(
    Extension(glob): Extension<Arc<Glob>>,
    Json(form): Json<NewClassData>,
) -> Response {
    log::trace!(
        "admin::create_class( {:?}, {:?}, {:?}, {} ) called.",
        &form.name, &form.weekday, &form.start_time, form.teacher_id
    );

    if !WEEKDAYS.contains(&form.weekday.as_str()) {
        return respond_bad_request(format!(
            "{:?} is not a valid weekday.", &form.weekday
        ));
    }
    if Time::parse(&form.start_time, START_TIME_FMT).is_err() {
        return respond_bad_request(format!(
            "{:?} is not a valid HH:MM start time.", &form.start_time
        ));
    }

    let res = glob.db.insert_class(
        &form.name,
        &form.weekday,
        &form.start_time,
        form.teacher_id,
    ).await;

    match res {
        Ok(InsertClass::Created(class)) => (
            StatusCode::CREATED,
            Json(json!({
                "message": "Class created.",
                "class": &class,
            })),
        ).into_response(),
        Ok(InsertClass::NoSuchTeacher) => respond_bad_request(format!(
            "No teacher with id {}.", form.teacher_id
        )),
        Err(e) => {
            log::error!("Store::insert_class(...) returned error: {}", &e);
            json_500()
        },
    }
}

async fn enroll_students(
    Path(class_id): Path<i64>,
    Extension(glob): Extension<Arc<Glob>>,
    Json(form): Json<EnrollData>,
) -> Response {
    log::trace!(
        "admin::enroll_students( {}, [ {} students ] ) called.",
        class_id, form.student_ids.len()
    );

    if form.student_ids.is_empty() {
        return respond_bad_request("No student ids given.".to_owned());
    }

    match glob.db.enroll_students(class_id, &form.student_ids).await {
        Ok(Enroll::Enrolled(n)) => (
            StatusCode::OK,
            Json(json!({
                "message": "Students enrolled.",
                "count": n,
            })),
        ).into_response(),
        Ok(Enroll::NoSuchClass) => respond_not_found(format!(
            "No class with id {}.", class_id
        )),
        Ok(Enroll::NoSuchStudent) => respond_bad_request(
            "At least one of the given student ids does not exist.".to_owned()
        ),
        Err(e) => {
            log::error!(
                "Store::enroll_students( {}, ... ) returned error: {}",
                class_id, &e
            );
            json_500()
        },
    }
}

async fn overview(Extension(glob): Extension<Arc<Glob>>) -> Response {
    log::trace!("admin::overview( [ global state ] ) called.");

    let (n_students, n_teachers, n_classes, counts, pending) = tokio::join!(
        glob.db.count_users_with_role(Role::Student),
        glob.db.count_users_with_role(Role::Teacher),
        glob.db.count_classes(),
        glob.db.count_attendance(),
        glob.db.count_pending_leaves(),
    );

    let (n_students, n_teachers, n_classes, (total, present), pending) =
        match (n_students, n_teachers, n_classes, counts, pending) {
            (Ok(a), Ok(b), Ok(c), Ok(d), Ok(e)) => (a, b, c, d, e),
            _ => {
                log::error!("Error assembling overview counts.");
                return json_500();
            },
        };

    (
        StatusCode::OK,
        Json(json!({
            "overview": {
                "students": n_students,
                "teachers": n_teachers,
                "classes": n_classes,
                "attendance_records": total,
                "present_records": present,
                "attendance_rate": attendance_rate(present, total),
                "pending_leaves": pending,
            },
        })),
    ).into_response()
}
