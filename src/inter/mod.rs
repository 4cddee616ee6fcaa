/*!
Interoperation between the client (user) and server.

(Not the application and the database; that's covered by `auth` and `store`.)

Every response body is JSON. Error bodies all take the shape

```json
{ "message": "what went wrong" }
```

so the dashboard can surface them uniformly. Request authentication is a
middleware stack: `bearer_authenticate` turns an `Authorization: Bearer`
key into a `CurrentUser` request extension, and the per-role routers then
layer a `require_*` gate on top of it.
*/
use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::auth::{self, AuthResult};
use crate::config::Glob;
use crate::user::User;

pub mod admin;
pub mod student;
pub mod teacher;

/// The authenticated caller, stashed in the request extensions by
/// `bearer_authenticate` for handlers downstream.
#[derive(Clone, Debug)]
pub struct CurrentUser(pub User);

/// Data type to read the body of a login request.
#[derive(Debug, Deserialize)]
pub struct LoginData {
    pub email: String,
    pub password: String,
}

fn message_response(code: StatusCode, msg: &str) -> Response {
    (code, Json(json!({ "message": msg }))).into_response()
}

/**
Return a JSON response in the case of an unrecoverable* error.

(*"Unrecoverable" from the perspective of fielding the current request,
not from the perspective of the program crashing.)
*/
pub fn json_500() -> Response {
    message_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Something went wrong on our end.",
    )
}

pub fn respond_bad_request(msg: String) -> Response {
    log::trace!("respond_bad_request( {:?} ) called.", &msg);

    message_response(StatusCode::BAD_REQUEST, &msg)
}

pub fn respond_unauthorized(msg: &str) -> Response {
    log::trace!("respond_unauthorized( {:?} ) called.", msg);

    message_response(StatusCode::UNAUTHORIZED, msg)
}

pub fn respond_forbidden(msg: &str) -> Response {
    log::trace!("respond_forbidden( {:?} ) called.", msg);

    message_response(StatusCode::FORBIDDEN, msg)
}

pub fn respond_not_found(msg: String) -> Response {
    log::trace!("respond_not_found( {:?} ) called.", &msg);

    message_response(StatusCode::NOT_FOUND, &msg)
}

/**
Middleware function to authenticate the bearer key on a request.

On success, the full `User` row of the key's holder rides along in the
request extensions as a `CurrentUser`; on any failure the request goes no
further. A key whose holder has since been deleted is treated the same as
a bad key.
*/
pub async fn bearer_authenticate<B>(
    mut req: Request<B>,
    next: Next<B>,
) -> Response {
    let glob: Arc<Glob> = match req.extensions().get::<Arc<Glob>>() {
        Some(glob) => glob.clone(),
        None => {
            log::error!("Glob extension missing from request.");
            return json_500();
        },
    };

    let key = match req.headers().get("authorization") {
        Some(h_val) => match h_val.to_str() {
            Ok(s) => match s.strip_prefix("Bearer ") {
                Some(k) => k,
                None => {
                    return respond_unauthorized(
                        "Authorization header must be a bearer key.",
                    );
                },
            },
            Err(e) => {
                log::error!(
                    "Failed converting authorization value {:?} to &str: {}",
                    h_val, &e
                );
                return respond_unauthorized(
                    "Authorization header value unrecognizable.",
                );
            },
        },
        None => {
            return respond_unauthorized(
                "Request must have an Authorization header.",
            );
        },
    };

    let claims = match glob.auth.check_key(key) {
        AuthResult::Claims(claims) => claims,
        AuthResult::InvalidKey => {
            return respond_unauthorized("Invalid or expired bearer key.");
        },
    };

    let user = match glob.db.get_user_by_id(claims.sub).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            log::warn!(
                "Valid key presented for nonexistent user {}.",
                claims.sub
            );
            return respond_unauthorized("Invalid or expired bearer key.");
        },
        Err(e) => {
            log::error!(
                "Store::get_user_by_id( {} ) returned error: {}",
                claims.sub, &e
            );
            return json_500();
        },
    };

    req.extensions_mut().insert(CurrentUser(user));
    next.run(req).await
}

/// The `CurrentUser` deposited by `bearer_authenticate`, or `None` if
/// somebody wired a route to skip that middleware.
fn current_user<B>(req: &Request<B>) -> Option<&User> {
    req.extensions().get::<CurrentUser>().map(|cu| &cu.0)
}

pub async fn require_admin<B>(req: Request<B>, next: Next<B>) -> Response {
    match current_user(&req) {
        Some(u) if u.is_admin() => next.run(req).await,
        Some(_) => respond_forbidden("This resource requires the Admin role."),
        None => {
            log::error!("require_admin ran without a CurrentUser extension.");
            json_500()
        },
    }
}

pub async fn require_teacher<B>(req: Request<B>, next: Next<B>) -> Response {
    match current_user(&req) {
        Some(u) if u.is_teacher() => next.run(req).await,
        Some(_) => respond_forbidden("This resource requires the Teacher role."),
        None => {
            log::error!("require_teacher ran without a CurrentUser extension.");
            json_500()
        },
    }
}

pub async fn require_student<B>(req: Request<B>, next: Next<B>) -> Response {
    match current_user(&req) {
        Some(u) if u.is_student() => next.run(req).await,
        Some(_) => respond_forbidden("This resource requires the Student role."),
        None => {
            log::error!("require_student ran without a CurrentUser extension.");
            json_500()
        },
    }
}

/// `POST /auth/login`
pub async fn login(
    Extension(glob): Extension<Arc<Glob>>,
    Json(form): Json<LoginData>,
) -> Response {
    log::trace!("login( {:?}, [ global state ] ) called.", &form.email);

    let user = match glob.db.get_user_by_email(&form.email).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            return respond_unauthorized("Invalid email/password combination.");
        },
        Err(e) => {
            log::error!(
                "Store::get_user_by_email( {:?} ) returned error: {}",
                &form.email, &e
            );
            return json_500();
        },
    };

    if !auth::check_password(&form.password, &user.pwhash) {
        return respond_unauthorized("Invalid email/password combination.");
    }

    let key = match glob.auth.issue_key(&user) {
        Ok(k) => k,
        Err(e) => {
            log::error!(
                "Auth::issue_key( [ user {} ] ) returned error: {}",
                user.id, &e
            );
            return json_500();
        },
    };

    (
        StatusCode::OK,
        Json(json!({
            "token": key,
            "user": &user,
        })),
    ).into_response()
}

/// `GET /auth/me`
pub async fn me(Extension(CurrentUser(user)): Extension<CurrentUser>) -> Response {
    log::trace!("me( [ user {} ] ) called.", user.id);

    (StatusCode::OK, Json(json!({ "user": &user }))).into_response()
}
