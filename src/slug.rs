use std::sync::LazyLock;

use regex::Regex;

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("Invalid regex"));

/// URL slug for a product or category name: lowercase, every run of
/// non-alphanumeric characters collapsed to one `-`, no leading or trailing `-`.
pub fn slugify(name: &str) -> String {
    let lowered = name.to_lowercase();
    NON_ALNUM.replace_all(&lowered, "-").trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::slugify;

    #[test]
    fn simple_name() {
        assert_eq!(slugify("Choco Bits"), "choco-bits");
    }

    #[test]
    fn collapses_punctuation_runs() {
        assert_eq!(slugify("Oat & Honey -- Crunch!"), "oat-honey-crunch");
    }

    #[test]
    fn trims_edges() {
        assert_eq!(slugify("  (Gluten Free)  "), "gluten-free");
    }

    #[test]
    fn keeps_digits() {
        assert_eq!(slugify("Pack of 12"), "pack-of-12");
    }
}
