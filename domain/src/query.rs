//! Query composer: sort resolution, search predicates, list plans and the
//! mutation payload builder shared by create and update.
//!
//! Nothing here renders SQL. Backends receive allow-listed column names and
//! bound values and turn them into statements (SQLite) or scans (in-memory).

use std::cmp::Ordering;
use std::fmt;

use crate::coerce::{coerce, required_message, Coercion};
use crate::schema::Schema;
use crate::{CoreError, PageRequest, Payload, Record, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    /// `ASC` (any case) is ascending; anything else is descending.
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("asc") {
            Direction::Asc
        } else {
            Direction::Desc
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// One allow-listed sort column. Only constructed from a `Schema`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortKey {
    column: &'static str,
    direction: Direction,
}

impl SortKey {
    pub(crate) fn new(column: &'static str, direction: Direction) -> Self {
        Self { column, direction }
    }

    pub fn column(&self) -> &'static str {
        self.column
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

/// Ordered list of sort keys.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SortSpec(Vec<SortKey>);

impl SortSpec {
    pub(crate) fn new(keys: Vec<SortKey>) -> Self {
        Self(keys)
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.iter().any(|k| k.column == column)
    }

    /// Append `primary_key ASC` unless the key already appears, so the
    /// effective order is total.
    pub fn with_tiebreak(&self, primary_key: &'static str) -> SortSpec {
        let mut keys = self.0.clone();
        if !self.contains(primary_key) {
            keys.push(SortKey::new(primary_key, Direction::Asc));
        }
        SortSpec(keys)
    }

    /// Compare two records the way `ORDER BY` would.
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for key in &self.0 {
            let left = a.get(key.column).unwrap_or(&Value::Null);
            let right = b.get(key.column).unwrap_or(&Value::Null);
            let ord = match key.direction {
                Direction::Asc => left.cmp_sql(right),
                Direction::Desc => right.cmp_sql(left),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}:{}", key.column, key.direction.as_str())?;
        }
        Ok(())
    }
}

/// Parse `column[:direction]` tokens against the schema allow-list.
///
/// Unknown columns are dropped. When nothing survives, the schema's default
/// sort is returned as a whole.
pub fn resolve_sort(schema: &Schema, raw: Option<&str>) -> SortSpec {
    let keys: Vec<SortKey> = raw
        .unwrap_or_default()
        .split(',')
        .filter_map(|token| {
            let token = token.trim();
            if token.is_empty() {
                return None;
            }
            let (name, direction) = match token.split_once(':') {
                Some((name, dir)) => (name.trim(), Direction::parse(dir)),
                None => (token, Direction::Desc),
            };
            schema
                .sortable_column(name)
                .map(|column| SortKey::new(column, direction))
        })
        .collect();
    if keys.is_empty() {
        schema.default_sort().clone()
    } else {
        SortSpec(keys)
    }
}

/// Case-insensitive substring match over a fixed set of columns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchPredicate {
    needle: String,
    columns: Vec<&'static str>,
}

impl SearchPredicate {
    /// `None` when the text is blank or there is nothing to search.
    pub fn over(text: &str, columns: &[&'static str]) -> Option<Self> {
        let needle = text.trim().to_lowercase();
        if needle.is_empty() || columns.is_empty() {
            return None;
        }
        Some(Self {
            needle,
            columns: columns.to_vec(),
        })
    }

    pub fn columns(&self) -> &[&'static str] {
        &self.columns
    }

    /// Lower-cased search text.
    pub fn needle(&self) -> &str {
        &self.needle
    }

    /// `LIKE` pattern with `\` as the escape character.
    pub fn like_pattern(&self) -> String {
        let mut pattern = String::with_capacity(self.needle.len() + 2);
        pattern.push('%');
        for c in self.needle.chars() {
            if matches!(c, '%' | '_' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('%');
        pattern
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.columns.iter().any(|column| {
            record
                .get(*column)
                .and_then(Value::search_text)
                .is_some_and(|text| text.to_lowercase().contains(&self.needle))
        })
    }
}

/// Search predicate over the schema's declared searchable columns.
pub fn search_predicate(schema: &Schema, text: Option<&str>) -> Option<SearchPredicate> {
    SearchPredicate::over(text?, schema.searchable())
}

/// Everything a backend needs to run a list query.
#[derive(Clone, Debug)]
pub struct ListPlan {
    pub columns: Vec<&'static str>,
    pub search: Option<SearchPredicate>,
    /// Sort as resolved from the request, echoed back to callers.
    pub sort: SortSpec,
    /// `sort` plus the primary-key tiebreak; what backends order by.
    pub order: SortSpec,
    pub limit: u64,
    pub offset: u64,
}

pub fn plan_list(schema: &Schema, request: &PageRequest) -> ListPlan {
    let sort = resolve_sort(schema, request.sort.as_deref());
    let order = sort.with_tiebreak(schema.primary_key());
    ListPlan {
        columns: schema.selectable_columns(),
        search: search_predicate(schema, request.search.as_deref()),
        sort,
        order,
        limit: u64::from(request.limit),
        offset: request.offset(),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationMode {
    Create,
    Update,
}

/// Column assignments resolved from an untrusted payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mutation {
    assignments: Vec<(&'static str, Value)>,
}

impl Mutation {
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn assignments(&self) -> &[(&'static str, Value)] {
        &self.assignments
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.assignments
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, v)| v)
    }

    fn set(&mut self, column: &'static str, value: Value) {
        match self.assignments.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.assignments.push((column, value)),
        }
    }

    pub fn into_record(self) -> Record {
        self.assignments
            .into_iter()
            .map(|(c, v)| (c.to_string(), v))
            .collect()
    }
}

/// Resolve a payload into column assignments for create or update.
///
/// Every field error is collected before failing, so one call reports all
/// problems. Handler fields skip coercion and merge whatever the handler
/// returns.
pub async fn build_mutation(
    schema: &Schema,
    payload: &Payload,
    mode: MutationMode,
) -> Result<Mutation, CoreError> {
    let mut mutation = Mutation::default();
    let mut errors = Vec::new();

    let writable = schema.fields().iter().filter(|f| match mode {
        MutationMode::Create => f.creatable,
        MutationMode::Update => f.editable,
    });
    for field in writable {
        let raw = payload.get(field.name);

        if let Some(handler) = field.handler() {
            if let Some(raw) = raw {
                if let Some((column, value)) = handler.resolve(raw).await? {
                    mutation.set(column, value);
                }
            }
            continue;
        }

        match coerce(field, raw) {
            Ok(Coercion::Absent) => {
                if mode == MutationMode::Create && field.required {
                    errors.push(required_message(field));
                }
            }
            Ok(Coercion::SetNull) => {
                if field.required {
                    errors.push(required_message(field));
                } else {
                    mutation.set(field.name, Value::Null);
                }
            }
            Ok(Coercion::SetValue(value)) => mutation.set(field.name, value),
            Err(message) => errors.push(message),
        }
    }

    if errors.is_empty() {
        Ok(mutation)
    } else {
        Err(CoreError::Validation(errors))
    }
}
