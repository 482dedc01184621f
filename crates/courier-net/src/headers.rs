//! Ordered, case-insensitive header sets.

use http::{HeaderName, HeaderValue};

use crate::error::RequestError;

/// An ordered header mapping with case-insensitive keys.
///
/// Inserting a key that is already present (in any casing) replaces that
/// entry in place: the position of the first occurrence is kept, while the
/// name's casing and the value come from the latest write.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderSet {
    entries: Vec<(String, String)>,
}

impl HeaderSet {
    /// Create an empty header set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a header.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx] = (name, value),
            None => self.entries.push((name, value)),
        }
    }

    /// Merge another set into this one; entries of `other` win.
    pub fn merge(&mut self, other: &HeaderSet) {
        for (name, value) in &other.entries {
            self.insert(name.clone(), value.clone());
        }
    }

    /// Look up a header value by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|idx| self.entries[idx].1.as_str())
    }

    /// Remove a header by name, ignoring case.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|idx| self.entries.remove(idx).1)
    }

    /// Whether a header is present, ignoring case.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Iterate headers in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize each header as a `Name: Value` line.
    ///
    /// Fails on the first name or value that is not valid on the wire.
    pub fn to_lines(&self) -> Result<Vec<String>, RequestError> {
        self.entries
            .iter()
            .map(|(name, value)| {
                HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                    RequestError::configuration(format!("invalid header name \"{name}\""))
                })?;
                HeaderValue::from_str(value).map_err(|_| {
                    RequestError::configuration(format!("invalid value for header \"{name}\""))
                })?;
                Ok(format!("{name}: {value}"))
            })
            .collect()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (name, value) in iter {
            set.insert(name, value);
        }
        set
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for HeaderSet {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_last_write_wins_with_its_casing() {
        let mut headers: HeaderSet = [("X-A", "1")].into_iter().collect();
        let update: HeaderSet = [("x-a", "2"), ("X-B", "3")].into_iter().collect();
        headers.merge(&update);

        let entries: Vec<_> = headers.iter().collect();
        assert_eq!(entries, vec![("x-a", "2"), ("X-B", "3")]);
    }

    #[test]
    fn test_replace_keeps_first_position() {
        let mut headers: HeaderSet = [("A", "1"), ("B", "2")].into_iter().collect();
        headers.insert("a", "3");

        let entries: Vec<_> = headers.iter().collect();
        assert_eq!(entries, vec![("a", "3"), ("B", "2")]);
    }

    #[test]
    fn test_lookup_ignores_case() {
        let mut headers = HeaderSet::new();
        headers.insert("Content-Type", "text/plain");
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert!(headers.contains("CONTENT-TYPE"));
        assert_eq!(headers.remove("Content-type").as_deref(), Some("text/plain"));
        assert!(headers.is_empty());
    }

    #[test]
    fn test_to_lines() {
        let headers: HeaderSet = [("Accept", "*/*"), ("X-Trace", "on")].into_iter().collect();
        assert_eq!(
            headers.to_lines().unwrap(),
            vec!["Accept: */*".to_string(), "X-Trace: on".to_string()]
        );
    }

    #[test]
    fn test_to_lines_rejects_bad_name() {
        let headers: HeaderSet = [("Bad Name", "x")].into_iter().collect();
        assert!(matches!(
            headers.to_lines(),
            Err(RequestError::Configuration(_))
        ));
    }
}
