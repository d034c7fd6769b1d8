use std::collections::HashMap;

/// A bidirectional dictionary for mapping between strings and dense integer IDs
///
/// IDs are assigned in insertion order starting at zero, so iterating a
/// dictionary always yields entries in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    /// Map from string to ID
    str_to_id: HashMap<String, u32>,
    /// Map from ID to string
    id_to_str: Vec<String>,
}

impl Dictionary {
    /// Create a new empty dictionary
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of entries in the dictionary
    pub fn len(&self) -> usize {
        self.id_to_str.len()
    }

    /// Returns `true` if the dictionary contains no entries
    pub fn is_empty(&self) -> bool {
        self.id_to_str.is_empty()
    }

    /// Get or create an ID for a string
    pub fn get_or_insert(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.str_to_id.get(s) {
            id
        } else {
            let id = self.id_to_str.len() as u32;
            self.str_to_id.insert(s.to_string(), id);
            self.id_to_str.push(s.to_string());
            id
        }
    }

    /// Look up the ID of a string without inserting it
    pub fn get(&self, s: &str) -> Option<u32> {
        self.str_to_id.get(s).copied()
    }

    /// Look up the string for an ID
    pub fn get_name(&self, id: u32) -> Option<&str> {
        self.id_to_str.get(id as usize).map(String::as_str)
    }

    /// Clear all entries
    pub fn clear(&mut self) {
        self.str_to_id.clear();
        self.id_to_str.clear();
    }

    /// Iterate over all (string, id) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.id_to_str
            .iter()
            .enumerate()
            .map(|(id, s)| (s.as_str(), id as u32))
    }
}

impl<S: AsRef<str>> FromIterator<S> for Dictionary {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut dict = Dictionary::new();
        for s in iter {
            dict.get_or_insert(s.as_ref());
        }
        dict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dictionary_basic() {
        let mut dict = Dictionary::new();
        assert_eq!(dict.len(), 0);

        let id1 = dict.get_or_insert("w-17");
        assert_eq!(id1, 0);
        assert_eq!(dict.len(), 1);

        let id2 = dict.get_or_insert("w-03");
        assert_eq!(id2, 1);
        assert_eq!(dict.len(), 2);

        // Getting the same string should return the same ID
        let id3 = dict.get_or_insert("w-17");
        assert_eq!(id3, id1);
        assert_eq!(dict.len(), 2);

        assert_eq!(dict.get("w-03"), Some(1));
        assert_eq!(dict.get("w-99"), None);
        assert_eq!(dict.get_name(0), Some("w-17"));
        assert_eq!(dict.get_name(2), None);
    }

    #[test]
    fn test_dictionary_clear() {
        let mut dict: Dictionary = ["positive", "negative"].into_iter().collect();
        assert_eq!(dict.len(), 2);

        dict.clear();
        assert!(dict.is_empty());
    }

    #[test]
    fn test_dictionary_iter() {
        let dict: Dictionary = ["tweet-9", "tweet-2", "tweet-5", "tweet-2"]
            .into_iter()
            .collect();

        let items: Vec<_> = dict.iter().collect();
        assert_eq!(items, vec![("tweet-9", 0), ("tweet-2", 1), ("tweet-5", 2)]);
    }
}
