use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, OnceLock};

use tracing::info;

use crate::{CoreError, Record, Value};

/// Rows for one table in the baseline dataset.
#[derive(Clone, Debug)]
pub struct SeedCollection {
    pub table: &'static str,
    pub primary_key: &'static str,
    pub rows: Vec<Record>,
}

struct Collection {
    primary_key: &'static str,
    rows: Vec<Record>,
    /// Highest id ever handed out, so deleted ids are never reused.
    high_water: i64,
}

impl Collection {
    fn new(primary_key: &'static str, rows: Vec<Record>) -> Self {
        let mut collection = Self {
            primary_key,
            rows,
            high_water: 0,
        };
        collection.high_water = collection.max_id();
        collection
    }

    fn id_of(&self, row: &Record) -> Option<i64> {
        row.get(self.primary_key).and_then(Value::as_i64)
    }

    fn max_id(&self) -> i64 {
        self.rows
            .iter()
            .filter_map(|r| self.id_of(r))
            .max()
            .unwrap_or(0)
    }

    fn position(&self, id: i64) -> Option<usize> {
        self.rows.iter().position(|r| self.id_of(r) == Some(id))
    }

    fn next_id(&mut self) -> i64 {
        let id = self.max_id().max(self.high_water) + 1;
        self.high_water = id;
        id
    }
}

/// The store's collections, handed to `read`/`write` closures.
///
/// Borrowed rows never leave the store: callers clone what they return.
#[derive(Default)]
pub struct Tables {
    collections: BTreeMap<&'static str, Collection>,
}

impl Tables {
    fn seeded(baseline: Vec<SeedCollection>) -> Self {
        let collections = baseline
            .into_iter()
            .map(|seed| (seed.table, Collection::new(seed.primary_key, seed.rows)))
            .collect();
        Self { collections }
    }

    /// All rows of a table; empty for an unknown table.
    pub fn rows(&self, table: &str) -> &[Record] {
        self.collections
            .get(table)
            .map(|c| c.rows.as_slice())
            .unwrap_or_default()
    }

    pub fn find(&self, table: &str, id: i64) -> Option<&Record> {
        let collection = self.collections.get(table)?;
        collection.position(id).map(|i| &collection.rows[i])
    }

    /// Insert a row under a freshly assigned id and return a copy of it.
    pub fn insert(&mut self, table: &'static str, primary_key: &'static str, values: Record) -> Record {
        let collection = self
            .collections
            .entry(table)
            .or_insert_with(|| Collection::new(primary_key, Vec::new()));
        let id = collection.next_id();
        let mut row = values;
        row.insert(collection.primary_key.to_string(), Value::Int(id));
        collection.rows.push(row.clone());
        row
    }

    /// Merge `values` onto an existing row. The primary key is never
    /// overwritten.
    pub fn update(&mut self, table: &str, id: i64, values: Record) -> Option<Record> {
        let collection = self.collections.get_mut(table)?;
        let index = collection.position(id)?;
        let primary_key = collection.primary_key;
        let row = &mut collection.rows[index];
        for (column, value) in values {
            if column != primary_key {
                row.insert(column, value);
            }
        }
        Some(row.clone())
    }

    pub fn remove(&mut self, table: &str, id: i64) -> bool {
        let Some(collection) = self.collections.get_mut(table) else {
            return false;
        };
        match collection.position(id) {
            Some(index) => {
                collection.rows.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Process-lifetime record collections standing in for the database.
///
/// The baseline is loaded on first access and only once. Every operation
/// takes the internal lock for its whole duration and never suspends while
/// holding it.
pub struct InMemoryStore {
    baseline: fn() -> Vec<SeedCollection>,
    state: OnceLock<Mutex<Tables>>,
}

impl InMemoryStore {
    pub fn new(baseline: fn() -> Vec<SeedCollection>) -> Self {
        Self {
            baseline,
            state: OnceLock::new(),
        }
    }

    /// Store seeded with the job board baseline.
    pub fn job_board() -> Self {
        Self::new(super::seed::job_board)
    }

    /// Store with no baseline rows.
    pub fn empty() -> Self {
        Self::new(Vec::new)
    }

    #[cfg(test)]
    fn is_seeded(&self) -> bool {
        self.state.get().is_some()
    }

    fn cell(&self) -> &Mutex<Tables> {
        self.state.get_or_init(|| {
            let baseline = (self.baseline)();
            info!(collections = baseline.len(), "seeding in-memory store");
            Mutex::new(Tables::seeded(baseline))
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, CoreError> {
        self.cell()
            .lock()
            .map_err(|_| CoreError::Internal("in-memory store mutex poisoned".into()))
    }

    pub fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, CoreError> {
        let tables = self.lock()?;
        Ok(f(&tables))
    }

    pub fn write<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> Result<T, CoreError> {
        let mut tables = self.lock()?;
        Ok(f(&mut tables))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::job_board()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn all(store: &InMemoryStore, table: &str) -> Vec<Record> {
        store.read(|t| t.rows(table).to_vec()).unwrap()
    }

    fn get(store: &InMemoryStore, table: &str, id: i64) -> Option<Record> {
        store.read(|t| t.find(table, id).cloned()).unwrap()
    }

    fn tiny() -> Vec<SeedCollection> {
        vec![SeedCollection {
            table: "things",
            primary_key: "id",
            rows: vec![
                row(&[("id", Value::Int(1)), ("name", Value::from("a"))]),
                row(&[("id", Value::Int(3)), ("name", Value::from("b"))]),
            ],
        }]
    }

    #[test]
    fn seeds_lazily_and_once() {
        let store = InMemoryStore::new(tiny);
        assert!(!store.is_seeded());
        assert_eq!(all(&store, "things").len(), 2);
        assert!(store.is_seeded());

        // later accesses must not reload the baseline
        store.write(|t| t.remove("things", 1)).unwrap();
        assert_eq!(all(&store, "things").len(), 1);
    }

    #[test]
    fn ids_follow_max_and_are_not_reused() {
        let store = InMemoryStore::new(tiny);
        let created = store
            .write(|t| t.insert("things", "id", row(&[("name", Value::from("c"))])))
            .unwrap();
        assert_eq!(created.get("id"), Some(&Value::Int(4)));

        assert!(store.write(|t| t.remove("things", 4)).unwrap());
        let created = store
            .write(|t| t.insert("things", "id", Record::new()))
            .unwrap();
        assert_eq!(created.get("id"), Some(&Value::Int(5)));
    }

    #[test]
    fn reads_are_copies() {
        let store = InMemoryStore::new(tiny);
        let mut copy = get(&store, "things", 1).unwrap();
        copy.insert("name".into(), Value::from("mutated"));
        let again = get(&store, "things", 1).unwrap();
        assert_eq!(again.get("name"), Some(&Value::from("a")));
    }

    #[test]
    fn update_merges_and_protects_primary_key() {
        let store = InMemoryStore::new(tiny);
        let updated = store
            .write(|t| {
                t.update(
                    "things",
                    3,
                    row(&[("id", Value::Int(99)), ("extra", Value::Null)]),
                )
            })
            .unwrap()
            .unwrap();
        assert_eq!(updated.get("id"), Some(&Value::Int(3)));
        assert_eq!(updated.get("name"), Some(&Value::from("b")));
        assert_eq!(updated.get("extra"), Some(&Value::Null));
        assert!(store.write(|t| t.update("things", 42, Record::new())).unwrap().is_none());
    }

    #[test]
    fn unknown_tables_are_empty() {
        let store = InMemoryStore::empty();
        assert!(all(&store, "nothing").is_empty());
        assert!(!store.write(|t| t.remove("nothing", 1)).unwrap());
        let created = store
            .write(|t| t.insert("fresh", "fresh_id", Record::new()))
            .unwrap();
        assert_eq!(created.get("fresh_id"), Some(&Value::Int(1)));
    }
}
