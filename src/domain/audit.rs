use serde::{Deserialize, Serialize};

/// An append-only log embedded in a document.
///
/// There is no way to edit or remove an entry once appended. Appends happen
/// on a copy of the owning document and land only if that document's
/// compare-and-swap succeeds, so concurrent appends never overwrite each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditLog<T>(Vec<T>);

impl<T> AuditLog<T> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn append(&mut self, entry: T) {
        self.0.push(entry);
    }

    pub fn entries(&self) -> &[T] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.0.iter()
    }

    pub fn last(&self) -> Option<&T> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T> Default for AuditLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T> IntoIterator for &'a AuditLog<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_order() {
        let mut log = AuditLog::new();
        log.append("first");
        log.append("second");
        assert_eq!(log.entries(), &["first", "second"]);
        assert_eq!(log.last(), Some(&"second"));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_serializes_as_plain_array() {
        let mut log = AuditLog::new();
        log.append(1u8);
        assert_eq!(serde_json::to_string(&log).unwrap(), "[1]");
        let back: AuditLog<u8> = serde_json::from_str("[1,2]").unwrap();
        assert_eq!(back.len(), 2);
    }
}
