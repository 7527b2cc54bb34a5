//! Query-string codec.
//!
//! Converts between a URL query string and a [`QueryMap`], using bracket
//! notation for list values (`color[]=red&color[]=blue`). The free functions at
//! the bottom of the module are the URL-building helpers used by sort, paging and
//! filter controls: each one parses the current query, applies a single change
//! and re-stringifies, so keys that are not mentioned survive untouched.
//!
//! Nothing in here fails. Undecodable bytes are replaced lossily and keys that
//! are not understood are carried through as-is.

use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    Single(String),
    List(Vec<String>),
}

impl QueryValue {
    /// A scalar becomes a one-element list.
    pub fn into_vec(self) -> Vec<String> {
        match self {
            QueryValue::Single(s) => vec![s],
            QueryValue::List(items) => items,
        }
    }

    pub fn is_empty_list(&self) -> bool {
        matches!(self, QueryValue::List(items) if items.is_empty())
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::Single(value.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        QueryValue::Single(value)
    }
}

impl From<Vec<String>> for QueryValue {
    fn from(value: Vec<String>) -> Self {
        QueryValue::List(value)
    }
}

impl From<Vec<&str>> for QueryValue {
    fn from(value: Vec<&str>) -> Self {
        QueryValue::List(value.into_iter().map(str::to_string).collect())
    }
}

/// Key -> value map decoded from a query string. Keys are kept sorted so that
/// [`QueryMap::to_query_string`] is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueryMap(pub BTreeMap<String, QueryValue>);

impl QueryMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `search` (with or without the leading `?`).
    ///
    /// `key[]` and `key[N]` append to a list; a plain key that repeats also
    /// turns into a list, in order of appearance.
    pub fn parse(search: &str) -> Self {
        let raw = search.strip_prefix('?').unwrap_or(search);
        let mut map = Self::new();
        for (k, v) in form_urlencoded::parse(raw.as_bytes()) {
            let (key, is_list) = split_key(&k);
            if key.is_empty() {
                continue;
            }
            map.push(key.to_string(), v.into_owned(), is_list);
        }
        map
    }

    fn push(&mut self, key: String, value: String, is_list: bool) {
        match self.0.entry(key) {
            Entry::Vacant(e) => {
                e.insert(if is_list {
                    QueryValue::List(vec![value])
                } else {
                    QueryValue::Single(value)
                });
            }
            Entry::Occupied(mut e) => {
                let slot = e.get_mut();
                let mut items = std::mem::replace(slot, QueryValue::List(Vec::new())).into_vec();
                items.push(value);
                *slot = QueryValue::List(items);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&QueryValue> {
        self.0.get(key)
    }

    /// List projection: absent is empty, a scalar is a one-element list.
    pub fn get_array(&self, key: &str) -> Vec<String> {
        self.0
            .get(key)
            .cloned()
            .map(QueryValue::into_vec)
            .unwrap_or_default()
    }

    /// Scalar projection: a list yields its first element.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            QueryValue::Single(s) => Some(s.clone()),
            QueryValue::List(items) => items.first().cloned(),
        }
    }

    /// Setting an empty list removes the key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<QueryValue>) {
        let value = value.into();
        let key = key.into();
        if value.is_empty_list() {
            self.0.remove(&key);
        } else {
            self.0.insert(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<QueryValue> {
        self.0.remove(key)
    }

    /// Merge `updates`: `Some` overwrites, `None` (or an empty list) deletes.
    pub fn apply<I, K>(&mut self, updates: I)
    where
        I: IntoIterator<Item = (K, Option<QueryValue>)>,
        K: Into<String>,
    {
        for (key, value) in updates {
            let key = key.into();
            match value {
                Some(v) => self.set(key, v),
                None => {
                    self.0.remove(&key);
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_query_string(&self) -> String {
        let mut parts = Vec::new();
        for (key, value) in &self.0 {
            let key = encode(key);
            match value {
                QueryValue::Single(s) => parts.push(format!("{}={}", key, encode(s))),
                QueryValue::List(items) => {
                    for item in items {
                        parts.push(format!("{}[]={}", key, encode(item)));
                    }
                }
            }
        }
        parts.join("&")
    }

    /// `pathname` alone when the map is empty, otherwise `pathname?query`.
    pub fn href(&self, pathname: &str) -> String {
        let qs = self.to_query_string();
        if qs.is_empty() {
            pathname.to_string()
        } else {
            format!("{}?{}", pathname, qs)
        }
    }
}

impl fmt::Display for QueryMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query_string())
    }
}

// `color[]` and `color[3]` are list keys; anything else (including `a[b]`) is a
// plain key and passes through verbatim.
fn split_key(raw: &str) -> (&str, bool) {
    if let Some(stripped) = raw.strip_suffix(']') {
        if let Some(open) = stripped.rfind('[') {
            let inner = &stripped[open + 1..];
            if inner.bytes().all(|b| b.is_ascii_digit()) && open > 0 {
                return (&stripped[..open], true);
            }
        }
    }
    (raw, false)
}

fn encode(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

pub fn parse(search: &str) -> QueryMap {
    QueryMap::parse(search)
}

pub fn stringify(map: &QueryMap) -> String {
    map.to_query_string()
}

/// Apply `updates` to the query in `current_search` and return the new URL.
pub fn with_updated_params<I, K>(pathname: &str, current_search: &str, updates: I) -> String
where
    I: IntoIterator<Item = (K, Option<QueryValue>)>,
    K: Into<String>,
{
    let mut map = QueryMap::parse(current_search);
    map.apply(updates);
    map.href(pathname)
}

/// Treat `key` as a set: drop `value` if present, append it otherwise.
pub fn toggle_array_param(pathname: &str, current_search: &str, key: &str, value: &str) -> String {
    let mut values = QueryMap::parse(current_search).get_array(key);
    if values.iter().any(|v| v == value) {
        values.retain(|v| v != value);
    } else {
        values.push(value.to_string());
    }
    with_updated_params(pathname, current_search, [(key, Some(QueryValue::List(values)))])
}

pub fn set_param(pathname: &str, current_search: &str, key: &str, value: &str) -> String {
    with_updated_params(pathname, current_search, [(key, Some(QueryValue::from(value)))])
}

pub fn remove_params(pathname: &str, current_search: &str, keys: &[&str]) -> String {
    with_updated_params(pathname, current_search, keys.iter().map(|k| (*k, None::<QueryValue>)))
}

pub fn get_array_param(search: &str, key: &str) -> Vec<String> {
    QueryMap::parse(search).get_array(key)
}

pub fn get_string_param(search: &str, key: &str) -> Option<String> {
    QueryMap::parse(search).get_string(key)
}
