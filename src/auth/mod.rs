//! Login gate: users kept in `user.csv` with Argon2 password hashes.

use anyhow::{anyhow, Context};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

use crate::error::{InventoryError, Result};
use crate::persist::write_atomic;

/// One row of `user.csv`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    pub username: String,
    pub email: String,
    /// Argon2 PHC string, never the plaintext.
    pub password: String,
}

pub struct UserStore {
    path: PathBuf,
}

impl UserStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All registered users; empty when the file does not exist yet.
    pub fn users(&self) -> Result<Vec<User>> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("opening {:?}", self.path))
                    .into())
            }
        };
        let mut rdr = ReaderBuilder::new().from_reader(io::BufReader::new(file));
        let users = rdr
            .deserialize()
            .collect::<std::result::Result<Vec<User>, _>>()
            .with_context(|| format!("parsing {:?}", self.path))?;
        Ok(users)
    }

    pub fn signup(&self, username: &str, email: &str, password: &str) -> Result<()> {
        for (field, value) in [("username", username), ("email", email), ("password", password)] {
            if value.trim().is_empty() {
                return Err(InventoryError::validation(field, "must not be empty"));
            }
        }
        let mut users = self.users()?;
        if users.iter().any(|u| u.username == username) {
            return Err(InventoryError::UserExists(username.to_string()));
        }
        users.push(User {
            username: username.to_string(),
            email: email.to_string(),
            password: hash_password(password)?,
        });
        self.save(&users)?;
        info!(username, "user registered");
        Ok(())
    }

    /// `Ok(false)` for an unknown user or a wrong password.
    pub fn verify(&self, username: &str, password: &str) -> Result<bool> {
        let users = self.users()?;
        match users.iter().find(|u| u.username == username) {
            Some(user) => verify_password(password, &user.password),
            None => Ok(false),
        }
    }

    pub fn change_password(&self, username: &str, current: &str, new: &str) -> Result<()> {
        if new.trim().is_empty() {
            return Err(InventoryError::validation("password", "must not be empty"));
        }
        let mut users = self.users()?;
        let user = users
            .iter_mut()
            .find(|u| u.username == username)
            .ok_or(InventoryError::InvalidCredentials)?;
        if !verify_password(current, &user.password)? {
            warn!(username, "password change rejected");
            return Err(InventoryError::InvalidCredentials);
        }
        user.password = hash_password(new)?;
        self.save(&users)?;
        info!(username, "password changed");
        Ok(())
    }

    fn save(&self, users: &[User]) -> Result<()> {
        write_atomic(&self.path, |w| {
            let mut wtr = WriterBuilder::new().from_writer(w);
            for user in users {
                wtr.serialize(user)?;
            }
            wtr.flush()?;
            Ok(())
        })?;
        Ok(())
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("hashing password: {}", e))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| anyhow!("stored password hash: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
