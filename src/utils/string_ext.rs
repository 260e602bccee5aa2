//! Small string-cleanup helpers shared across config parsing and display code.

/// Trims and drops empty strings, collapsing `Some("")`/`Some("  ")` to `None`.
#[inline]
pub fn clean_optional_string(s: Option<&String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[inline]
pub fn trim_string(s: &str) -> String {
    s.trim().to_string()
}

pub trait StringExt {
    /// Trims and returns `None` for an empty result.
    fn clean(&self) -> Option<String>;
    fn trimmed(&self) -> String;
}

impl StringExt for str {
    #[inline]
    fn clean(&self) -> Option<String> {
        let trimmed = self.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    #[inline]
    fn trimmed(&self) -> String {
        self.trim().to_string()
    }
}

impl StringExt for String {
    #[inline]
    fn clean(&self) -> Option<String> {
        self.as_str().clean()
    }

    #[inline]
    fn trimmed(&self) -> String {
        self.as_str().trimmed()
    }
}

impl<T: AsRef<str>> StringExt for Option<T> {
    #[inline]
    fn clean(&self) -> Option<String> {
        self.as_ref().and_then(|s| s.as_ref().clean())
    }

    #[inline]
    fn trimmed(&self) -> String {
        self.as_ref().map(|s| s.as_ref().trim().to_string()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_optional_string_drops_blank() {
        assert_eq!(clean_optional_string(Some(&"  ".to_string())), None);
        assert_eq!(clean_optional_string(Some(&" x ".to_string())), Some("x".to_string()));
    }

    #[test]
    fn string_ext_clean_on_option() {
        let s: Option<&str> = Some("  ");
        assert_eq!(s.clean(), None);
    }
}
