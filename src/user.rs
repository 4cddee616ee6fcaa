/*!
Database users.
*/
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let token = match self {
            Role::Admin   => "Admin",
            Role::Teacher => "Teacher",
            Role::Student => "Student",
        };

        write!(f, "{}", token)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Admin"   => Ok(Role::Admin),
            "Teacher" => Ok(Role::Teacher),
            "Student" => Ok(Role::Student),
            _ => Err(format!("{:?} is not a valid Role.", s)),
        }
    }
}

/// One row of the `users` table.
///
/// The password hash rides along for the login path but never leaves the
/// server; it is skipped on serialization.
#[derive(Clone, Debug, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(skip_serializing)]
    pub pwhash: String,
}

impl User {
    pub fn is_admin(&self) -> bool { self.role == Role::Admin }
    pub fn is_teacher(&self) -> bool { self.role == Role::Teacher }
    pub fn is_student(&self) -> bool { self.role == Role::Student }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trip() {
        for role in [Role::Admin, Role::Teacher, Role::Student] {
            let s = role.to_string();
            let back: Role = s.parse().unwrap();
            assert_eq!(role, back);
        }
    }

    #[test]
    fn bad_role_string() {
        assert!("Boss".parse::<Role>().is_err());
        assert!("student".parse::<Role>().is_err());
        assert!("".parse::<Role>().is_err());
    }
}
