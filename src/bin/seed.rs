/*!
Populating a local development environment with sufficient data to allow
some experimentation.

Reads the same `config.toml` (or `$ROLLCALL_CONFIG`) as the server, so it
seeds whatever database the server will use. All seeded users share the
password "password".
*/
use simplelog::{ColorChoice, TermLogger, TerminalMode};

use rollcall::auth;
use rollcall::config;
use rollcall::store::{classes::{Enroll, InsertClass}, users::InsertUser, Store};
use rollcall::user::Role;

static TEACHERS: &[(&str, &str)] = &[
    ("Mr Berro", "berro@rollcall.test"),
    ("Ms Jenny", "jenny@rollcall.test"),
];

static STUDENTS: &[(&str, &str)] = &[
    ("John Smith", "john.smith@rollcall.test"),
    ("Jane Doe", "jane.doe@rollcall.test"),
    ("Sam Wyle", "sam.wyle@rollcall.test"),
    ("Nisha Marwah", "nisha.marwah@rollcall.test"),
];

/// (name, weekday, start time, TEACHERS index, STUDENTS indices)
static CLASSES: &[(&str, &str, &str, usize, &[usize])] = &[
    ("Algebra I", "Monday", "08:30", 0, &[0, 1, 2]),
    ("Algebra I", "Wednesday", "08:30", 0, &[3]),
    ("World History", "Tuesday", "10:00", 1, &[0, 2, 3]),
    ("Chemistry", "Thursday", "13:15", 1, &[1, 2]),
];

async fn seed_user(
    db: &Store,
    name: &str,
    email: &str,
    pwhash: &str,
    role: Role,
) -> Result<i64, String> {
    match db.insert_user(name, email, pwhash, role).await {
        Ok(InsertUser::Created(u)) => {
            log::info!("Inserted {} {} ({}).", role, name, email);
            Ok(u.id)
        },
        Ok(InsertUser::DuplicateEmail) => {
            log::info!("{} already present; leaving as is.", email);
            match db.get_user_by_email(email).await {
                Ok(Some(u)) => Ok(u.id),
                Ok(None) => Err(format!(
                    "{} is a duplicate yet doesn't exist; baffling.", email
                )),
                Err(e) => Err(format!("Error re-fetching {}: {}", email, &e)),
            }
        },
        Err(e) => Err(format!("Error inserting {}: {}", email, &e)),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), String> {
    let log_cfg = simplelog::ConfigBuilder::new()
        .add_filter_allow_str("rollcall")
        .build();
    TermLogger::init(
        rollcall::log_level_from_env(),
        log_cfg,
        TerminalMode::Stdout,
        ColorChoice::Auto,
    ).map_err(|e| format!("Error initializing logging: {}", &e))?;

    let config_path = std::env::var("ROLLCALL_CONFIG")
        .unwrap_or_else(|_| "config.toml".to_owned());
    let glob = config::load_configuration(&config_path).await?;
    let db = &glob.db;

    let pwhash = auth::hash_password("password")
        .map_err(|e| format!("Error hashing seed password: {}", &e))?;

    let mut teacher_ids: Vec<i64> = Vec::with_capacity(TEACHERS.len());
    for (name, email) in TEACHERS.iter() {
        teacher_ids.push(seed_user(db, name, email, &pwhash, Role::Teacher).await?);
    }

    let mut student_ids: Vec<i64> = Vec::with_capacity(STUDENTS.len());
    for (name, email) in STUDENTS.iter() {
        student_ids.push(seed_user(db, name, email, &pwhash, Role::Student).await?);
    }

    for (name, weekday, start_time, t_idx, s_idxs) in CLASSES.iter() {
        let class = match db.insert_class(
            name, weekday, start_time, teacher_ids[*t_idx]
        ).await {
            Ok(InsertClass::Created(c)) => c,
            Ok(InsertClass::NoSuchTeacher) => {
                return Err(format!(
                    "Teacher {} vanished while seeding.", teacher_ids[*t_idx]
                ));
            },
            Err(e) => {
                return Err(format!("Error inserting class {:?}: {}", name, &e));
            },
        };

        let roster: Vec<i64> = s_idxs.iter().map(|&i| student_ids[i]).collect();
        match db.enroll_students(class.id, &roster).await {
            Ok(Enroll::Enrolled(n)) => {
                log::info!(
                    "Inserted class {:?} ({} {}) with {} students.",
                    name, weekday, start_time, n
                );
            },
            Ok(x) => {
                return Err(format!(
                    "Enrolling in class {:?} failed: {:?}", name, &x
                ));
            },
            Err(e) => {
                return Err(format!(
                    "Error enrolling in class {:?}: {}", name, &e
                ));
            },
        }
    }

    log::info!("Seeding complete.");
    Ok(())
}
