/*!
Structs to hold configuration data and global variables.
*/
use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

use crate::{
    auth, auth::Auth,
    store::{users::InsertUser, Store},
    user::Role,
};

#[derive(Deserialize)]
struct ConfigFile {
    db_connect_string: Option<String>,
    jwt_secret: Option<String>,
    client_base_url: Option<String>,
    admin_name: Option<String>,
    admin_email: Option<String>,
    admin_password: Option<String>,
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug)]
pub struct Cfg {
    pub db_connect_string: String,
    pub jwt_secret: String,
    pub client_base_url: String,
    pub default_admin_name: String,
    pub default_admin_email: String,
    pub default_admin_password: String,
    pub addr: SocketAddr,
}

impl std::default::Default for Cfg {
    fn default() -> Self {
        Self {
            db_connect_string: "host=localhost user=rollcall_test password='rollcall_test' dbname=rollcall_test".to_owned(),
            jwt_secret: "rollcall-dev-secret".to_owned(),
            client_base_url: "http://localhost:8002".to_owned(),
            default_admin_name: "Administrator".to_owned(),
            default_admin_email: "admin@rollcall.not.an.address".to_owned(),
            default_admin_password: "toot".to_owned(),
            addr: SocketAddr::new(
                "0.0.0.0".parse().unwrap(),
                8002
            ),
        }
    }
}

impl Cfg {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let file_contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Unable to read config file: {}", &e))?;
        let cf: ConfigFile = toml::from_str(&file_contents)
            .map_err(|e| format!("Unable to deserialize config file: {}", &e))?;

        let mut c = Self::default();

        if let Some(s) = cf.db_connect_string {
            c.db_connect_string = s;
        }
        if let Some(s) = cf.jwt_secret {
            c.jwt_secret = s;
        }
        if let Some(s) = cf.client_base_url {
            // A trailing slash would double up in generated check-in URLs.
            c.client_base_url = s.trim_end_matches('/').to_owned();
        }
        if let Some(s) = cf.admin_name {
            c.default_admin_name = s;
        }
        if let Some(s) = cf.admin_email {
            c.default_admin_email = s;
        }
        if let Some(s) = cf.admin_password {
            c.default_admin_password = s;
        }
        if let Some(s) = cf.host {
            c.addr.set_ip(
                s.parse().map_err(|e| format!(
                    "Error parsing {:?} as IP address: {}",
                    &s, &e
                ))?
            );
        }
        if let Some(n) = cf.port {
            c.addr.set_port(n);
        }

        Ok(c)
    }
}

/**
This guy will haul around some global variables and be passed in an
`axum::Extension` to the handlers who need him.

No user or class data lives here; the database is the single source of
truth, and every request reads through `db`.
*/
pub struct Glob {
    pub db: Store,
    pub auth: Auth,
    pub client_base_url: String,
    pub addr: SocketAddr,
}

/// Loads system configuration and ensures all appropriate database tables
/// exist.
///
/// Also assures existence of default admin.
pub async fn load_configuration<P: AsRef<Path>>(path: P) -> Result<Glob, String> {
    let cfg = Cfg::from_file(path.as_ref())?;
    log::info!("Configuration file read; will listen on {}.", &cfg.addr);

    log::trace!("Checking state of DB...");
    let db = Store::new(cfg.db_connect_string.clone());
    if let Err(e) = db.ensure_db_schema().await {
        let estr = format!("Unable to ensure state of DB: {}", &e);
        return Err(estr);
    }
    log::trace!("...DB okay.");

    log::trace!("Checking existence of default Admin...");
    match db.get_user_by_email(&cfg.default_admin_email).await {
        Err(e) => {
            let estr = format!(
                "Error attempting to check existence of default Admin ({}): {}",
                &cfg.default_admin_email, &e
            );
            return Err(estr);
        },
        Ok(Some(_)) => {
            log::trace!("Default Admin OK.");
        },
        Ok(None) => {
            log::info!(
                "Default Admin ({}) doesn't exist; inserting.",
                &cfg.default_admin_email
            );
            let pwhash = auth::hash_password(&cfg.default_admin_password)
                .map_err(|e| format!(
                    "Error hashing default Admin password: {}", &e
                ))?;
            match db.insert_user(
                &cfg.default_admin_name,
                &cfg.default_admin_email,
                &pwhash,
                Role::Admin,
            ).await {
                Ok(InsertUser::Created(_)) => {
                    log::trace!("Default Admin inserted.");
                },
                Ok(InsertUser::DuplicateEmail) => {
                    // Somebody else inserted it between our check and now.
                    log::warn!("Default Admin appeared while we were inserting it.");
                },
                Err(e) => {
                    let estr = format!("Error inserting default Admin: {}", &e);
                    return Err(estr);
                },
            }
        },
    }

    let glob = Glob {
        db,
        auth: Auth::new(&cfg.jwt_secret),
        client_base_url: cfg.client_base_url,
        addr: cfg.addr,
    };

    Ok(glob)
}
