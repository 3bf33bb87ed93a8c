//! Filesystem-safe name derivation (spec §6).

const FORBIDDEN: [char; 9] = ['\\', '/', '*', '?', ':', '"', '<', '>', '|'];
const MAX_LEN: usize = 100;

/// Removes `[\/*?:"<>|]`, replaces spaces with underscores, trims, and
/// truncates to 100 chars. Idempotent: re-slugging a slug is a no-op.
pub fn slug(name: &str) -> String {
    let without_forbidden: String = name.chars().filter(|c| !FORBIDDEN.contains(c)).collect();
    let trimmed = without_forbidden.trim();
    let underscored = trimmed.replace(' ', "_");
    underscored.chars().take(MAX_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::slug;

    #[test]
    fn strips_forbidden_characters() {
        assert_eq!(slug("a/b\\c*d?e:f\"g<h>i|j"), "abcdefghij");
    }

    #[test]
    fn replaces_spaces_and_trims() {
        assert_eq!(slug("  Blade of the Immortal  "), "Blade_of_the_Immortal");
    }

    #[test]
    fn truncates_to_max_len() {
        let long = "a".repeat(250);
        assert_eq!(slug(&long).chars().count(), MAX_LEN);
    }

    #[test]
    fn is_idempotent() {
        let name = "  Tuyệt Thế / Đường*Nhân?  ";
        let once = slug(name);
        let twice = slug(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn preserves_ascii_alphanumerics() {
        let name = "Volume123";
        assert_eq!(slug(name), "Volume123");
    }
}
