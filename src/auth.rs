use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use pgwire::api::METADATA_USER;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

use crate::limits::MAX_USER_ID_LEN;
use crate::model::{Actor, UserId};

/// Shared-password startup auth. Identity is whatever user name the client
/// presents; privilege comes from the configured admin list.
#[derive(Debug)]
pub struct InnkeepAuthSource {
    password: String,
}

impl InnkeepAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for InnkeepAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

/// Resolve the requesting actor from connection startup metadata.
pub fn actor_from_metadata(
    metadata: &HashMap<String, String>,
    admins: &HashSet<UserId>,
) -> Option<Actor> {
    let user = metadata.get(METADATA_USER)?.trim();
    if user.is_empty() || user.chars().count() > MAX_USER_ID_LEN {
        return None;
    }
    Some(Actor {
        user_id: user.to_string(),
        privileged: admins.contains(user),
    })
}
