//! Injected random source for response-template selection.
//! Production uses `rand`; tests pin a fixed index for exact assertions.

use rand::Rng;

pub trait ResponsePicker: Send + Sync {
    /// Pick one option. Returns `None` for an empty slice.
    fn pick<'a>(&self, options: &'a [String]) -> Option<&'a str>;
}

/// Uniform random selection.
pub struct RandomPicker;

impl ResponsePicker for RandomPicker {
    fn pick<'a>(&self, options: &'a [String]) -> Option<&'a str> {
        if options.is_empty() {
            return None;
        }
        let idx = rand::rng().random_range(0..options.len());
        options.get(idx).map(String::as_str)
    }
}

/// Always picks `index % len`. Deterministic, for tests.
pub struct FixedPicker(pub usize);

impl ResponsePicker for FixedPicker {
    fn pick<'a>(&self, options: &'a [String]) -> Option<&'a str> {
        if options.is_empty() {
            return None;
        }
        options.get(self.0 % options.len()).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_picker_wraps() {
        let opts = vec!["a".to_string(), "b".to_string()];
        assert_eq!(FixedPicker(0).pick(&opts), Some("a"));
        assert_eq!(FixedPicker(3).pick(&opts), Some("b"));
        assert_eq!(FixedPicker(0).pick(&[]), None);
    }

    #[test]
    fn random_picker_stays_in_bounds() {
        let opts = vec!["x".to_string()];
        for _ in 0..10 {
            assert_eq!(RandomPicker.pick(&opts), Some("x"));
        }
    }
}
