//!
//! slink storage module
//! --------------------
//! Owner-scoped short-link mapping store for the resource service. Mappings
//! live in one Parquet table (`mappings.parquet`) with the columns
//! `short_id`, `original_url`, `access_count` and `owner`.
//!
//! Ownership enforcement is a property of this layer, not of handler code:
//! every mutating operation checks the bound `AuthzContext` against the OLD
//! row's owner inside the store mutex, immediately before the rewrite. A
//! handler cannot reach the mutation without passing the check, and because
//! check and rewrite share one critical section, concurrent requests cannot
//! interleave an unauthorized write.
//!
//! The public API centers on `SharedStore` (`Arc<Mutex<Store>>`); requests
//! bind an `AuthzContext` with `SharedStore::bind` and mutate through the
//! resulting `StoreSession`.

use anyhow::Result;
use parking_lot::Mutex;
use polars::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::identity::AuthzContext;

/// One short-link record as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub short_id: String,
    pub original_url: String,
    pub access_count: i64,
    pub owner: String,
}

fn mk_schema_df() -> DataFrame {
    let ids: Series = Series::new("short_id".into(), Vec::<String>::new());
    let urls: Series = Series::new("original_url".into(), Vec::<String>::new());
    let counts: Series = Series::new("access_count".into(), Vec::<i64>::new());
    let owners: Series = Series::new("owner".into(), Vec::<String>::new());
    DataFrame::new(vec![ids.into(), urls.into(), counts.into(), owners.into()]).unwrap()
}

fn id_matches(av: &AnyValue, short_id: &str) -> bool {
    match av {
        AnyValue::String(s) => *s == short_id,
        AnyValue::StringOwned(s) => s.as_str() == short_id,
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

/// The before-update/before-delete gate. Raised exactly where the original
/// row is about to be replaced or removed.
fn guard_mutation(ctx: &AuthzContext, owner: &str) -> AppResult<()> {
    if ctx.allows_mutation_of(owner) {
        Ok(())
    } else {
        debug!(actor = ?ctx.actor(), owner = %owner, "mutation blocked");
        Err(AppError::forbidden("not_owner", "Forbidden : User does not own this mapping"))
    }
}

/// On-disk mapping table. Use through `SharedStore`.
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn mappings_path(&self) -> PathBuf {
        self.root.join("mappings.parquet")
    }

    fn read_df(&self) -> Result<DataFrame> {
        let path = self.mappings_path();
        if !path.exists() {
            return Ok(mk_schema_df());
        }
        let file = std::fs::File::open(&path)?;
        let df = ParquetReader::new(file).finish()?;
        Ok(df)
    }

    fn write_df(&self, mut df: DataFrame) -> Result<()> {
        let path = self.mappings_path();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).ok();
        }
        let mut f = std::fs::File::create(&path)?;
        ParquetWriter::new(&mut f).finish(&mut df)?;
        Ok(())
    }

    fn find_row(df: &DataFrame, short_id: &str) -> Result<Option<usize>> {
        for i in 0..df.height() {
            let v = df.column("short_id")?.get(i)?;
            if id_matches(&v, short_id) {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    fn row_to_mapping(df: &DataFrame, i: usize) -> Result<Mapping> {
        Ok(Mapping {
            short_id: str_at(df, "short_id", i)?,
            original_url: str_at(df, "original_url", i)?,
            access_count: df.column("access_count")?.i64()?.get(i).unwrap_or(0),
            owner: str_at(df, "owner", i)?,
        })
    }

    /// Drop the row for `short_id` and append the replacement.
    fn put_row(&self, df: DataFrame, m: &Mapping) -> Result<()> {
        let mut df = df;
        if df.height() > 0 {
            let id_s = df.column("short_id")?.clone();
            if let Some(series) = id_s.as_series() {
                let mask: ChunkedArray<BooleanType> =
                    series.iter().map(|av| !id_matches(&av, &m.short_id)).collect();
                df = df.filter(&mask)?;
            }
        }
        let new = DataFrame::new(vec![
            Series::new("short_id".into(), vec![m.short_id.clone()]).into(),
            Series::new("original_url".into(), vec![m.original_url.clone()]).into(),
            Series::new("access_count".into(), vec![m.access_count]).into(),
            Series::new("owner".into(), vec![m.owner.clone()]).into(),
        ])?;
        if df.height() == 0 {
            self.write_df(new)
        } else {
            let stacked = df.vstack(&new)?;
            self.write_df(stacked)
        }
    }

    /// Insert a new mapping owned by the acting user.
    pub fn insert_mapping(&self, ctx: &AuthzContext, short_id: &str, url: &str) -> AppResult<()> {
        let Some(owner) = ctx.actor() else {
            return Err(AppError::auth("missing_actor", "an authenticated user is required to create mappings"));
        };
        let df = self.read_df()?;
        if Store::find_row(&df, short_id)?.is_some() {
            return Err(AppError::user("short_id_in_use", "Short ID already in use"));
        }
        let m = Mapping {
            short_id: short_id.to_string(),
            original_url: url.to_string(),
            access_count: 0,
            owner: owner.to_string(),
        };
        self.put_row(df, &m)?;
        Ok(())
    }

    pub fn get_mapping(&self, short_id: &str) -> Result<Option<Mapping>> {
        let df = self.read_df()?;
        match Store::find_row(&df, short_id)? {
            Some(i) => Ok(Some(Store::row_to_mapping(&df, i)?)),
            None => Ok(None),
        }
    }

    /// Resolve a short id and bump its access count. The bump is an update,
    /// so it passes through the same gate as any other mutation; the system
    /// context used by the open redirect path is admin-equivalent.
    pub fn touch(&self, ctx: &AuthzContext, short_id: &str) -> AppResult<Option<String>> {
        let df = self.read_df()?;
        let Some(i) = Store::find_row(&df, short_id)? else {
            return Ok(None);
        };
        let mut m = Store::row_to_mapping(&df, i)?;
        guard_mutation(ctx, &m.owner)?;
        m.access_count += 1;
        let url = m.original_url.clone();
        self.put_row(df, &m)?;
        Ok(Some(url))
    }

    pub fn stats(&self, short_id: &str) -> Result<Option<i64>> {
        let df = self.read_df()?;
        match Store::find_row(&df, short_id)? {
            Some(i) => Ok(Some(df.column("access_count")?.i64()?.get(i).unwrap_or(0))),
            None => Ok(None),
        }
    }

    pub fn list_ids(&self) -> Result<Vec<String>> {
        let df = self.read_df()?;
        let mut out = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            out.push(str_at(&df, "short_id", i)?);
        }
        Ok(out)
    }

    /// Point the mapping at a new URL. Ok(false) when the id is unknown;
    /// forbidden when the bound context may not mutate the old row.
    pub fn update_mapping(&self, ctx: &AuthzContext, short_id: &str, new_url: &str) -> AppResult<bool> {
        let df = self.read_df()?;
        let Some(i) = Store::find_row(&df, short_id)? else {
            return Ok(false);
        };
        let mut m = Store::row_to_mapping(&df, i)?;
        guard_mutation(ctx, &m.owner)?;
        m.original_url = new_url.to_string();
        self.put_row(df, &m)?;
        Ok(true)
    }

    fn remove_row(&self, df: DataFrame, short_id: &str) -> Result<()> {
        let id_s = df.column("short_id")?.clone();
        let mut kept = df;
        if let Some(series) = id_s.as_series() {
            let mask: ChunkedArray<BooleanType> =
                series.iter().map(|av| !id_matches(&av, short_id)).collect();
            kept = kept.filter(&mask)?;
        }
        self.write_df(kept)
    }

    pub fn delete_mapping(&self, ctx: &AuthzContext, short_id: &str) -> AppResult<bool> {
        let df = self.read_df()?;
        let Some(i) = Store::find_row(&df, short_id)? else {
            return Ok(false);
        };
        let m = Store::row_to_mapping(&df, i)?;
        guard_mutation(ctx, &m.owner)?;
        self.remove_row(df, short_id)?;
        Ok(true)
    }

    /// Delete every mapping. Aborts wholesale, deleting nothing, if any row
    /// fails the ownership gate for the bound context.
    pub fn delete_all(&self, ctx: &AuthzContext) -> AppResult<usize> {
        let df = self.read_df()?;
        let count = df.height();
        if count == 0 {
            return Ok(0);
        }
        for i in 0..count {
            let owner = str_at(&df, "owner", i)?;
            guard_mutation(ctx, &owner)?;
        }
        self.write_df(mk_schema_df())?;
        Ok(count)
    }
}

/// Thread-safe handle over the mapping table.
#[derive(Clone)]
pub struct SharedStore(pub Arc<Mutex<Store>>);

impl SharedStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        Ok(Self(Arc::new(Mutex::new(Store::new(root)?))))
    }

    /// Bind an authorization context for the duration of one request.
    /// Sessions are cheap, single-use, and never shared across requests.
    pub fn bind(&self, ctx: AuthzContext) -> StoreSession {
        StoreSession { store: self.clone(), ctx }
    }
}

/// One request's view of the store, carrying the resolved authorization
/// context into every mutation. The critical sections below are synchronous:
/// no await point sits between the ownership check and the rewrite, so a
/// cancelled request leaves either the old state or the new, never a mix.
pub struct StoreSession {
    store: SharedStore,
    ctx: AuthzContext,
}

impl StoreSession {
    pub fn create(&self, short_id: &str, url: &str) -> AppResult<()> {
        self.store.0.lock().insert_mapping(&self.ctx, short_id, url)
    }

    pub fn get(&self, short_id: &str) -> Result<Option<Mapping>> {
        self.store.0.lock().get_mapping(short_id)
    }

    pub fn touch(&self, short_id: &str) -> AppResult<Option<String>> {
        self.store.0.lock().touch(&self.ctx, short_id)
    }

    pub fn stats(&self, short_id: &str) -> Result<Option<i64>> {
        self.store.0.lock().stats(short_id)
    }

    pub fn list_ids(&self) -> Result<Vec<String>> {
        self.store.0.lock().list_ids()
    }

    pub fn update(&self, short_id: &str, new_url: &str) -> AppResult<bool> {
        self.store.0.lock().update_mapping(&self.ctx, short_id, new_url)
    }

    pub fn delete(&self, short_id: &str) -> AppResult<bool> {
        self.store.0.lock().delete_mapping(&self.ctx, short_id)
    }

    pub fn delete_all(&self) -> AppResult<usize> {
        self.store.0.lock().delete_all(&self.ctx)
    }
}
