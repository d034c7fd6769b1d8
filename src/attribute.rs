use std::collections::BTreeMap;

/// A named feature with its value
///
/// Text items are turned into bags of token attributes before they reach the
/// downstream classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Attribute name
    pub name: String,
    /// Value of the attribute
    pub value: f64,
}

impl Attribute {
    /// Create a new attribute with a name and value
    pub fn new<T: Into<String>>(name: T, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

impl From<&str> for Attribute {
    fn from(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: 1.0,
        }
    }
}

impl<S: Into<String>> From<(S, f64)> for Attribute {
    fn from((name, value): (S, f64)) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Split text into lowercase tokens.
///
/// Mentions (`@user`) and hashtags keep their sigil; URLs collapse into a
/// single `<url>` token.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split_whitespace() {
        if word.starts_with("http://") || word.starts_with("https://") {
            tokens.push("<url>".to_string());
            continue;
        }
        let mut current = String::new();
        for c in word.chars() {
            if c.is_alphanumeric() || c == '\'' || ((c == '@' || c == '#') && current.is_empty()) {
                current.extend(c.to_lowercase());
            } else if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            tokens.push(current);
        }
    }
    tokens
}

/// Bag-of-words attributes of a text: token counts, plus adjacent token pairs
/// when `bigrams` is set. Attributes come out sorted by name.
pub fn featurize(text: &str, bigrams: bool) -> Vec<Attribute> {
    let tokens = tokenize(text);
    let mut counts: BTreeMap<String, f64> = BTreeMap::new();
    for token in &tokens {
        *counts.entry(token.clone()).or_default() += 1.0;
    }
    if bigrams {
        for pair in tokens.windows(2) {
            *counts.entry(format!("{} {}", pair[0], pair[1])).or_default() += 1.0;
        }
    }
    counts
        .into_iter()
        .map(|(name, value)| Attribute::new(name, value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_creation() {
        let attr1 = Attribute::new("sunny", 1.0);
        assert_eq!(attr1.name, "sunny");
        assert_eq!(attr1.value, 1.0);

        let attr2 = Attribute::from("rain");
        assert_eq!(attr2.value, 1.0);

        let attr3 = Attribute::from(("storm", 0.5));
        assert_eq!(attr3.name, "storm");
        assert_eq!(attr3.value, 0.5);
    }

    #[test]
    fn test_tokenize_tweet() {
        let tokens = tokenize("@WeatherBot It's SO hot!! #heatwave http://t.co/x");
        assert_eq!(
            tokens,
            vec!["@weatherbot", "it's", "so", "hot", "#heatwave", "<url>"]
        );
    }

    #[test]
    fn test_featurize_counts_and_bigrams() {
        let attrs = featurize("rain rain go away", false);
        assert_eq!(
            attrs,
            vec![
                Attribute::new("away", 1.0),
                Attribute::new("go", 1.0),
                Attribute::new("rain", 2.0),
            ]
        );

        let attrs = featurize("rain rain", true);
        assert!(attrs.contains(&Attribute::new("rain rain", 1.0)));
    }
}
