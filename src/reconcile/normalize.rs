use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Minimum Jaro-Winkler similarity for a "did you mean" hint.
pub const SUGGESTION_THRESHOLD: f64 = 0.85;

/// Matching key for names: compatibility-decomposed, marks stripped,
/// lowercased, inner whitespace collapsed.
pub fn name_key(s: &str) -> String {
    let folded = s
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn student_name_key(first_name: &str, last_name: &str) -> String {
    name_key(&format!("{} {}", first_name, last_name))
}

/// "Amina Yusuf Ali" -> ("Amina", "Yusuf Ali"). A single word becomes the first name.
pub fn split_full_name(full: &str) -> (String, String) {
    let mut parts = full.split_whitespace();
    let first = parts.next().unwrap_or("").to_string();
    let last = parts.collect::<Vec<_>>().join(" ");
    (first, last)
}

/// Best candidate above the suggestion threshold; display only, never used to match.
pub fn closest_name<'a, I>(target: &str, candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let key = name_key(target);
    if key.is_empty() {
        return None;
    }
    let mut best: Option<(&str, f64)> = None;
    for cand in candidates {
        let score = strsim::jaro_winkler(&key, &name_key(cand));
        if score < SUGGESTION_THRESHOLD {
            continue;
        }
        if best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((cand, score));
        }
    }
    best.map(|(c, _)| c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_ignore_case_accents_and_spacing() {
        assert_eq!(name_key("  Al   Noor  School "), "al noor school");
        assert_eq!(name_key("École Sainte-Thérèse"), "ecole sainte-therese");
        assert_eq!(name_key("ÉCOLE\tSAINTE-THÉRÈSE"), "ecole sainte-therese");
        assert_eq!(name_key("Zoë Ibrahim"), name_key("zoe  IBRAHIM"));
        assert_ne!(name_key("Hope Academy"), name_key("Hope Academy 2"));
    }

    #[test]
    fn arabic_text_survives_normalization() {
        // Harakat are combining marks and drop out of the key.
        assert_eq!(name_key("مُحَمَّد"), name_key("محمد"));
        // Alef with madda folds to a bare alef.
        assert_eq!(name_key(" القرآن "), name_key("القران"));
    }

    #[test]
    fn student_keys_join_first_and_last() {
        assert_eq!(student_name_key("Amina", "Yusuf  Ali"), "amina yusuf ali");
        assert_eq!(
            split_full_name(" Amina  Yusuf Ali "),
            ("Amina".to_string(), "Yusuf Ali".to_string())
        );
        assert_eq!(split_full_name("Madonna"), ("Madonna".to_string(), String::new()));
        let (first, last) = split_full_name("Amina Yusuf Ali");
        assert_eq!(student_name_key(&first, &last), name_key("Amina Yusuf Ali"));
    }

    #[test]
    fn closest_name_only_suggests_near_misses() {
        let existing = ["Al Noor Primary", "Hope Academy", "Unity Secondary"];
        assert_eq!(
            closest_name("Al Nour Primary", existing.iter().copied()),
            Some("Al Noor Primary")
        );
        assert_eq!(closest_name("Zebra", existing.iter().copied()), None);
        assert_eq!(closest_name("  ", existing.iter().copied()), None);
    }
}
