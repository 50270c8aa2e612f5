//!
//! slink credential store
//! ----------------------
//! Username/password persistence for the identity service. Credentials live
//! in a single Parquet table (`users.parquet`) with argon2 PHC password
//! hashes, an administrative flag and the most recently issued token. All
//! read-modify-write cycles run under one mutex, so registration and token
//! updates serialize and no partial write is observable.

use anyhow::{anyhow, Result};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use parking_lot::Mutex;
use password_hash::{PasswordHash, SaltString};
use polars::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_ADMIN_USER: &str = "admin";
const DEFAULT_ADMIN_PASSWORD: &str = "admin";

fn mk_schema_df() -> DataFrame {
    let usernames: Series = Series::new("username".into(), Vec::<String>::new());
    let hashes: Series = Series::new("password_hash".into(), Vec::<String>::new());
    let is_admin: Series = Series::new("is_admin".into(), Vec::<bool>::new());
    let tokens: Series = Series::new("token".into(), Vec::<Option<String>>::new());
    DataFrame::new(vec![usernames.into(), hashes.into(), is_admin.into(), tokens.into()]).unwrap()
}

fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2.hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}

fn verify_password_hash(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else {
        false
    }
}

fn name_matches(av: &AnyValue, username: &str) -> bool {
    match av {
        AnyValue::String(s) => *s == username,
        AnyValue::StringOwned(s) => s.as_str() == username,
        _ => false,
    }
}

fn str_at(df: &DataFrame, col: &str, i: usize) -> Result<String> {
    let v = df.column(col)?.get(i)?;
    Ok(match v {
        AnyValue::String(s) => s.to_string(),
        AnyValue::StringOwned(s) => s.to_string(),
        _ => String::new(),
    })
}

fn opt_str_at(df: &DataFrame, col: &str, i: usize) -> Result<Option<String>> {
    let v = df.column(col)?.get(i)?;
    Ok(match v {
        AnyValue::String(s) => Some(s.to_string()),
        AnyValue::StringOwned(s) => Some(s.to_string()),
        _ => None,
    })
}

/// On-disk credential table. Use through `SharedCredentials`.
pub struct Credentials {
    root: PathBuf,
}

impl Credentials {
    fn users_path(&self) -> PathBuf {
        self.root.join("users.parquet")
    }

    fn read_users(&self) -> Result<DataFrame> {
        let path = self.users_path();
        if !path.exists() {
            return Ok(mk_schema_df());
        }
        let file = std::fs::File::open(&path)?;
        let df = ParquetReader::new(file).finish()?;
        Ok(df)
    }

    fn write_users(&self, mut df: DataFrame) -> Result<()> {
        let path = self.users_path();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).ok();
        }
        let mut f = std::fs::File::create(&path)?;
        ParquetWriter::new(&mut f).finish(&mut df)?;
        Ok(())
    }

    fn find_row(df: &DataFrame, username: &str) -> Result<Option<usize>> {
        for i in 0..df.height() {
            let uname = df.column("username")?.get(i)?;
            if name_matches(&uname, username) {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    /// Replace (or append) the row for `username` with the given values.
    fn put_row(&self, df: DataFrame, username: &str, hash: String, is_admin: bool, token: Option<String>) -> Result<()> {
        let mut df = df;
        if df.height() > 0 {
            let user_s = df.column("username")?.clone();
            if let Some(series) = user_s.as_series() {
                let mask: ChunkedArray<BooleanType> =
                    series.iter().map(|av| !name_matches(&av, username)).collect();
                df = df.filter(&mask)?;
            }
        }
        let new = DataFrame::new(vec![
            Series::new("username".into(), vec![username.to_string()]).into(),
            Series::new("password_hash".into(), vec![hash]).into(),
            Series::new("is_admin".into(), vec![is_admin]).into(),
            Series::new("token".into(), vec![token]).into(),
        ])?;
        if df.height() == 0 {
            self.write_users(new)
        } else {
            let stacked = df.vstack(&new)?;
            self.write_users(stacked)
        }
    }

    /// Create a new user. Returns false when the username is already taken.
    pub fn create(&self, username: &str, password: &str) -> Result<bool> {
        let df = self.read_users()?;
        if Self::find_row(&df, username)?.is_some() {
            return Ok(false);
        }
        let hash = hash_password(password)?;
        self.put_row(df, username, hash, false, None)?;
        Ok(true)
    }

    pub fn exists(&self, username: &str) -> Result<bool> {
        let df = self.read_users()?;
        Ok(Self::find_row(&df, username)?.is_some())
    }

    /// Check a password against the stored argon2 hash.
    pub fn verify_password(&self, username: &str, password: &str) -> Result<bool> {
        let df = self.read_users()?;
        let Some(i) = Self::find_row(&df, username)? else {
            return Ok(false);
        };
        let hash = str_at(&df, "password_hash", i)?;
        Ok(verify_password_hash(&hash, password))
    }

    /// Record the most recently issued token. Returns false for unknown users.
    /// Older tokens are not invalidated by this: verification is by signature
    /// alone and never consults this column.
    pub fn set_token(&self, username: &str, token: &str) -> Result<bool> {
        let df = self.read_users()?;
        let Some(i) = Self::find_row(&df, username)? else {
            return Ok(false);
        };
        let hash = str_at(&df, "password_hash", i)?;
        let is_admin = df.column("is_admin")?.bool()?.get(i).unwrap_or(false);
        self.put_row(df, username, hash, is_admin, Some(token.to_string()))?;
        Ok(true)
    }

    pub fn current_token(&self, username: &str) -> Result<Option<String>> {
        let df = self.read_users()?;
        let Some(i) = Self::find_row(&df, username)? else {
            return Ok(None);
        };
        opt_str_at(&df, "token", i)
    }

    /// Re-hash and store a new password, keeping flag and token.
    pub fn update_password(&self, username: &str, new_password: &str) -> Result<bool> {
        let df = self.read_users()?;
        let Some(i) = Self::find_row(&df, username)? else {
            return Ok(false);
        };
        let is_admin = df.column("is_admin")?.bool()?.get(i).unwrap_or(false);
        let token = opt_str_at(&df, "token", i)?;
        let hash = hash_password(new_password)?;
        self.put_row(df, username, hash, is_admin, token)?;
        Ok(true)
    }

    pub fn is_admin(&self, username: &str) -> Result<bool> {
        let df = self.read_users()?;
        let Some(i) = Self::find_row(&df, username)? else {
            return Ok(false);
        };
        Ok(df.column("is_admin")?.bool()?.get(i).unwrap_or(false))
    }

    pub fn usernames(&self) -> Result<Vec<String>> {
        let df = self.read_users()?;
        let mut out = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            out.push(str_at(&df, "username", i)?);
        }
        Ok(out)
    }

    /// Seed the admin account on first startup, when no user table exists.
    pub fn ensure_default_admin(&self) -> Result<()> {
        if self.users_path().exists() {
            return Ok(());
        }
        let hash = hash_password(DEFAULT_ADMIN_PASSWORD)?;
        self.put_row(mk_schema_df(), DEFAULT_ADMIN_USER, hash, true, None)
    }
}

/// Thread-safe handle over the credential table.
#[derive(Clone)]
pub struct SharedCredentials(pub Arc<Mutex<Credentials>>);

impl SharedCredentials {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        Ok(Self(Arc::new(Mutex::new(Credentials { root: root.as_ref().to_path_buf() }))))
    }

    pub fn create(&self, username: &str, password: &str) -> Result<bool> {
        self.0.lock().create(username, password)
    }

    pub fn exists(&self, username: &str) -> Result<bool> {
        self.0.lock().exists(username)
    }

    pub fn verify_password(&self, username: &str, password: &str) -> Result<bool> {
        self.0.lock().verify_password(username, password)
    }

    pub fn set_token(&self, username: &str, token: &str) -> Result<bool> {
        self.0.lock().set_token(username, token)
    }

    pub fn current_token(&self, username: &str) -> Result<Option<String>> {
        self.0.lock().current_token(username)
    }

    pub fn update_password(&self, username: &str, new_password: &str) -> Result<bool> {
        self.0.lock().update_password(username, new_password)
    }

    pub fn is_admin(&self, username: &str) -> Result<bool> {
        self.0.lock().is_admin(username)
    }

    pub fn usernames(&self) -> Result<Vec<String>> {
        self.0.lock().usernames()
    }

    pub fn ensure_default_admin(&self) -> Result<()> {
        self.0.lock().ensure_default_admin()
    }
}
